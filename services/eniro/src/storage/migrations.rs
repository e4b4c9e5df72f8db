//! Embedded-file schema migrations.
//!
//! Migration SQL lives under `migrations/sqlite/` as
//! `NNNN_name.{up,down}.sql` pairs and is compiled into the binary, so
//! adding or removing a migration requires a rebuild. A row is recorded in
//! the `migrations` table per applied change, carrying the version
//! transition and the application version that performed it.

/// A single schema change in one direction.
#[derive(Debug, Clone, Copy)]
pub struct SchemaMigration {
    pub version: i64,
    pub name: &'static str,
    pub up: bool,
    pub sql: &'static str,
}

impl SchemaMigration {
    /// Schema version before this migration runs.
    #[must_use]
    pub const fn before(&self) -> i64 {
        if self.up { self.version - 1 } else { self.version }
    }

    /// Schema version after this migration runs.
    #[must_use]
    pub const fn after(&self) -> i64 {
        if self.up { self.version } else { self.version - 1 }
    }
}

macro_rules! migration {
    ($version:literal, $name:literal) => {
        [
            SchemaMigration {
                version: $version,
                name: $name,
                up: true,
                sql: include_str!(concat!(
                    "../../migrations/sqlite/",
                    stringify!($version),
                    "_",
                    $name,
                    ".up.sql"
                )),
            },
            SchemaMigration {
                version: $version,
                name: $name,
                up: false,
                sql: include_str!(concat!(
                    "../../migrations/sqlite/",
                    stringify!($version),
                    "_",
                    $name,
                    ".down.sql"
                )),
            },
        ]
    };
}

const MIGRATION_0001: [SchemaMigration; 2] = migration!(0001, "initial");
const MIGRATION_0002: [SchemaMigration; 2] = migration!(0002, "devices");

const ALL: [[SchemaMigration; 2]; 2] = [MIGRATION_0001, MIGRATION_0002];

/// Highest known schema version.
#[must_use]
pub fn latest_version() -> i64 {
    ALL.iter().map(|pair| pair[0].version).max().unwrap_or(0)
}

/// Migrations needed to move the schema from `current` to `target`,
/// in application order.
#[must_use]
pub fn between(current: i64, target: i64) -> Vec<SchemaMigration> {
    let mut migrations: Vec<SchemaMigration> = if current < target {
        ALL.iter()
            .flatten()
            .filter(|m| m.up && m.version > current && m.version <= target)
            .copied()
            .collect()
    } else {
        ALL.iter()
            .flatten()
            .filter(|m| !m.up && m.version <= current && m.version > target)
            .copied()
            .collect()
    };

    if current < target {
        migrations.sort_by_key(|m| m.version);
    } else {
        migrations.sort_by_key(|m| std::cmp::Reverse(m.version));
    }
    migrations
}
