//! Persistent store of baked tiles
//!
//! Tiles are looked up by worldspace, tile position and the encoded tile
//! input. The input hash narrows the search and the full input blob is
//! compared so hash collisions never return foreign data. Shapes referenced
//! by tile inputs are deduplicated into their own table.

use navmesh_common::{Error, ShapeSource, TilePosition, TilesPositionsRange};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub type TileId = i64;
pub type ShapeId = i64;

#[derive(thiserror::Error, Debug)]
pub enum DbError {
    #[error("navmesh database reached its size limit")]
    Full,

    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("tile data codec error: {0}")]
    Codec(String),
}

impl From<rusqlite::Error> for DbError {
    fn from(error: rusqlite::Error) -> Self {
        match error.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DiskFull) => DbError::Full,
            _ => DbError::Sqlite(error),
        }
    }
}

impl From<Error> for DbError {
    fn from(error: Error) -> Self {
        DbError::Codec(error.to_string())
    }
}

impl From<DbError> for Error {
    fn from(error: DbError) -> Self {
        Error::Storage(error.to_string())
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;

/// Stored tile header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub tile_id: TileId,
    pub version: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileData {
    pub tile_id: TileId,
    pub version: i32,
    pub data: Vec<u8>,
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS tiles (
        tile_id INTEGER PRIMARY KEY,
        revision INTEGER NOT NULL DEFAULT 1,
        worldspace TEXT NOT NULL,
        tile_position_x INTEGER NOT NULL,
        tile_position_y INTEGER NOT NULL,
        version INTEGER NOT NULL,
        input_hash INTEGER NOT NULL,
        input BLOB NOT NULL,
        data BLOB NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS index_unique_tiles_by_worldspace_and_tile_position_and_input
        ON tiles (worldspace, tile_position_x, tile_position_y, input);

    CREATE INDEX IF NOT EXISTS index_tiles_by_worldspace_and_tile_position_and_input_hash
        ON tiles (worldspace, tile_position_x, tile_position_y, input_hash);

    CREATE TABLE IF NOT EXISTS shapes (
        shape_id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        type INTEGER NOT NULL,
        hash INTEGER NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS index_unique_shapes_by_name_and_type_and_hash
        ON shapes (name, type, hash);
";

/// Hashes are stored bit for bit in signed sqlite integers
fn sql_hash(hash: u64) -> i64 {
    hash as i64
}

fn input_hash(input: &[u8]) -> i64 {
    sql_hash(navmesh_common::hash_bytes(input))
}

fn find_shape_id(conn: &Connection, source: &ShapeSource) -> DbResult<Option<ShapeId>> {
    Ok(conn
        .query_row(
            "SELECT shape_id FROM shapes WHERE name = ?1 AND type = ?2 AND hash = ?3",
            params![source.name, source.shape_type as i32, sql_hash(source.hash)],
            |row| row.get(0),
        )
        .optional()?)
}

fn find_tile(conn: &Connection, worldspace: &str, tile: TilePosition, input: &[u8]) -> DbResult<Option<Tile>> {
    Ok(conn
        .query_row(
            "SELECT tile_id, version FROM tiles
             WHERE worldspace = ?1 AND tile_position_x = ?2 AND tile_position_y = ?3
               AND input_hash = ?4 AND input = ?5",
            params![worldspace, tile.x, tile.y, input_hash(input), input],
            |row| {
                Ok(Tile {
                    tile_id: row.get(0)?,
                    version: row.get(1)?,
                })
            },
        )
        .optional()?)
}

pub struct NavMeshDb {
    conn: Connection,
}

impl NavMeshDb {
    /// Opens or creates a store capped at `max_file_size` bytes
    pub fn open(path: impl AsRef<Path>, max_file_size: u64) -> DbResult<Self> {
        let path = path.as_ref();
        log::info!("Opening navmesh database {}", path.display());
        Self::init(Connection::open(path)?, max_file_size)
    }

    pub fn open_in_memory(max_file_size: u64) -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?, max_file_size)
    }

    fn init(conn: Connection, max_file_size: u64) -> DbResult<Self> {
        conn.execute_batch(SCHEMA)?;
        let page_size: i64 = conn.pragma_query_value(None, "page_size", |row| row.get(0))?;
        let max_page_count = (max_file_size / page_size.max(1) as u64).clamp(1, i64::MAX as u64) as i64;
        let applied: i64 =
            conn.pragma_update_and_check(None, "max_page_count", max_page_count, |row| row.get(0))?;
        log::debug!("Navmesh database page limit {applied} of {page_size} bytes");
        Ok(Self { conn })
    }

    pub fn find_tile(&self, worldspace: &str, tile: TilePosition, input: &[u8]) -> DbResult<Option<Tile>> {
        find_tile(&self.conn, worldspace, tile, input)
    }

    pub fn get_tile_data(&self, worldspace: &str, tile: TilePosition, input: &[u8]) -> DbResult<Option<TileData>> {
        Ok(self
            .conn
            .query_row(
                "SELECT tile_id, version, data FROM tiles
                 WHERE worldspace = ?1 AND tile_position_x = ?2 AND tile_position_y = ?3
                   AND input_hash = ?4 AND input = ?5",
                params![worldspace, tile.x, tile.y, input_hash(input), input],
                |row| {
                    Ok(TileData {
                        tile_id: row.get(0)?,
                        version: row.get(1)?,
                        data: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn find_shape_id(&self, source: &ShapeSource) -> DbResult<Option<ShapeId>> {
        find_shape_id(&self.conn, source)
    }

    /// Largest tile id in use, 0 for an empty store
    pub fn get_max_tile_id(&self) -> DbResult<TileId> {
        Ok(self
            .conn
            .query_row("SELECT max(tile_id) FROM tiles", [], |row| row.get::<_, Option<TileId>>(0))?
            .unwrap_or(0))
    }

    /// Largest shape id in use, 0 for an empty store
    pub fn get_max_shape_id(&self) -> DbResult<ShapeId> {
        Ok(self
            .conn
            .query_row("SELECT max(shape_id) FROM shapes", [], |row| row.get::<_, Option<ShapeId>>(0))?
            .unwrap_or(0))
    }

    pub fn tiles_count(&self) -> DbResult<usize> {
        let count: i64 = self.conn.query_row("SELECT count(*) FROM tiles", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn shapes_count(&self) -> DbResult<usize> {
        let count: i64 = self.conn.query_row("SELECT count(*) FROM shapes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Starts a write transaction; dropping it without commit rolls back
    pub fn transaction(&mut self) -> DbResult<DbTransaction<'_>> {
        Ok(DbTransaction {
            tx: self.conn.transaction()?,
        })
    }

    pub fn delete_tiles_at(&mut self, worldspace: &str, tile: TilePosition) -> DbResult<usize> {
        Ok(self.conn.execute(
            "DELETE FROM tiles WHERE worldspace = ?1 AND tile_position_x = ?2 AND tile_position_y = ?3",
            params![worldspace, tile.x, tile.y],
        )?)
    }

    /// Deletes every tile at a position but the one with `keep` id
    pub fn delete_tiles_at_except(&mut self, worldspace: &str, tile: TilePosition, keep: TileId) -> DbResult<usize> {
        Ok(self.conn.execute(
            "DELETE FROM tiles
             WHERE worldspace = ?1 AND tile_position_x = ?2 AND tile_position_y = ?3 AND tile_id != ?4",
            params![worldspace, tile.x, tile.y, keep],
        )?)
    }

    pub fn delete_tiles_outside_range(&mut self, worldspace: &str, range: &TilesPositionsRange) -> DbResult<usize> {
        Ok(self.conn.execute(
            "DELETE FROM tiles
             WHERE worldspace = ?1
               AND (tile_position_x < ?2 OR tile_position_x >= ?3
                    OR tile_position_y < ?4 OR tile_position_y >= ?5)",
            params![worldspace, range.begin.x, range.end.x, range.begin.y, range.end.y],
        )?)
    }

    pub fn vacuum(&self) -> DbResult<()> {
        self.conn.execute_batch("VACUUM")?;
        Ok(())
    }
}

pub struct DbTransaction<'a> {
    tx: rusqlite::Transaction<'a>,
}

impl DbTransaction<'_> {
    pub fn find_tile(&self, worldspace: &str, tile: TilePosition, input: &[u8]) -> DbResult<Option<Tile>> {
        find_tile(&self.tx, worldspace, tile, input)
    }

    pub fn find_shape_id(&self, source: &ShapeSource) -> DbResult<Option<ShapeId>> {
        find_shape_id(&self.tx, source)
    }

    pub fn insert_tile(
        &self,
        tile_id: TileId,
        worldspace: &str,
        tile: TilePosition,
        version: i32,
        input: &[u8],
        data: &[u8],
    ) -> DbResult<()> {
        self.tx.execute(
            "INSERT INTO tiles
                 (tile_id, revision, worldspace, tile_position_x, tile_position_y, version, input_hash, input, data)
             VALUES (?1, 1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![tile_id, worldspace, tile.x, tile.y, version, input_hash(input), input, data],
        )?;
        Ok(())
    }

    /// Replaces the data of a stored tile, returns the number of rows changed
    pub fn update_tile(&self, tile_id: TileId, version: i32, data: &[u8]) -> DbResult<usize> {
        Ok(self.tx.execute(
            "UPDATE tiles SET version = ?2, data = ?3, revision = revision + 1 WHERE tile_id = ?1",
            params![tile_id, version, data],
        )?)
    }

    pub fn insert_shape(&self, shape_id: ShapeId, source: &ShapeSource) -> DbResult<()> {
        self.tx.execute(
            "INSERT INTO shapes (shape_id, name, type, hash) VALUES (?1, ?2, ?3, ?4)",
            params![shape_id, source.name, source.shape_type as i32, sql_hash(source.hash)],
        )?;
        Ok(())
    }

    pub fn commit(self) -> DbResult<()> {
        self.tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navmesh_common::ShapeType;

    const MAX_SIZE: u64 = 64 * 1024 * 1024;

    fn shape(name: &str, hash: u64) -> ShapeSource {
        ShapeSource {
            name: name.to_string(),
            shape_type: ShapeType::Collision,
            hash,
        }
    }

    #[test]
    fn test_tiles_are_found_by_full_input() -> DbResult<()> {
        let mut db = NavMeshDb::open_in_memory(MAX_SIZE)?;
        let tile = TilePosition::new(1, -2);
        assert_eq!(db.get_max_tile_id()?, 0);
        assert!(db.find_tile("w", tile, b"input")?.is_none());

        let tx = db.transaction()?;
        tx.insert_tile(1, "w", tile, 3, b"input", b"data")?;
        tx.commit()?;

        assert_eq!(db.find_tile("w", tile, b"input")?, Some(Tile { tile_id: 1, version: 3 }));
        assert!(db.find_tile("w", tile, b"other")?.is_none());
        assert!(db.find_tile("v", tile, b"input")?.is_none());
        assert!(db.find_tile("w", TilePosition::new(1, 2), b"input")?.is_none());

        let tx = db.transaction()?;
        assert_eq!(tx.update_tile(1, 4, b"newer")?, 1);
        tx.commit()?;

        let data = db.get_tile_data("w", tile, b"input")?.unwrap();
        assert_eq!(data.version, 4);
        assert_eq!(data.data, b"newer");
        assert_eq!(db.get_max_tile_id()?, 1);
        assert_eq!(db.tiles_count()?, 1);
        Ok(())
    }

    #[test]
    fn test_uncommitted_transaction_rolls_back() -> DbResult<()> {
        let mut db = NavMeshDb::open_in_memory(MAX_SIZE)?;
        {
            let tx = db.transaction()?;
            tx.insert_shape(1, &shape("rock", 7))?;
            tx.insert_tile(1, "w", TilePosition::new(0, 0), 1, b"i", b"d")?;
        }
        assert_eq!(db.shapes_count()?, 0);
        assert_eq!(db.tiles_count()?, 0);
        Ok(())
    }

    #[test]
    fn test_shapes_are_unique() -> DbResult<()> {
        let mut db = NavMeshDb::open_in_memory(MAX_SIZE)?;
        let rock = shape("rock", u64::MAX);

        let tx = db.transaction()?;
        tx.insert_shape(5, &rock)?;
        assert_eq!(tx.find_shape_id(&rock)?, Some(5));
        assert!(tx.insert_shape(6, &rock).is_err());
        tx.commit()?;

        assert_eq!(db.find_shape_id(&rock)?, Some(5));
        assert_eq!(db.find_shape_id(&shape("rock", 1))?, None);
        assert_eq!(db.get_max_shape_id()?, 5);
        Ok(())
    }

    #[test]
    fn test_maintenance() -> DbResult<()> {
        let mut db = NavMeshDb::open_in_memory(MAX_SIZE)?;
        let tx = db.transaction()?;
        tx.insert_tile(1, "w", TilePosition::new(0, 0), 1, b"a", b"d")?;
        tx.insert_tile(2, "w", TilePosition::new(0, 0), 1, b"b", b"d")?;
        tx.insert_tile(3, "w", TilePosition::new(5, 0), 1, b"a", b"d")?;
        tx.insert_tile(4, "v", TilePosition::new(5, 0), 1, b"a", b"d")?;
        tx.commit()?;

        assert_eq!(db.delete_tiles_at_except("w", TilePosition::new(0, 0), 2)?, 1);
        let range = TilesPositionsRange::new(TilePosition::new(-1, -1), TilePosition::new(2, 2));
        assert_eq!(db.delete_tiles_outside_range("w", &range)?, 1);
        assert_eq!(db.tiles_count()?, 2);

        assert_eq!(db.delete_tiles_at("w", TilePosition::new(0, 0))?, 1);
        db.vacuum()?;
        assert_eq!(db.tiles_count()?, 1);
        Ok(())
    }

    #[test]
    fn test_size_limit_reports_full() -> DbResult<()> {
        let mut db = NavMeshDb::open_in_memory(0)?;
        let tx = db.transaction()?;
        let blob = vec![0x5a; 256 * 1024];
        let result = tx.insert_tile(1, "w", TilePosition::new(0, 0), 1, b"input", &blob);
        assert!(matches!(result, Err(DbError::Full)));
        Ok(())
    }

    #[test]
    fn test_reopen_from_file() -> DbResult<()> {
        let dir = tempfile::tempdir().map_err(|e| DbError::Codec(e.to_string()))?;
        let path = dir.path().join("navmesh.db");
        {
            let mut db = NavMeshDb::open(&path, MAX_SIZE)?;
            let tx = db.transaction()?;
            tx.insert_tile(9, "w", TilePosition::new(0, 0), 1, b"i", b"d")?;
            tx.commit()?;
        }
        let db = NavMeshDb::open(&path, MAX_SIZE)?;
        assert_eq!(db.get_max_tile_id()?, 9);
        Ok(())
    }
}
