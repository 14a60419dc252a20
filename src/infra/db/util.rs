use crate::application::repos::RepoError;

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed") => {
            RepoError::Duplicate {
                constraint: db
                    .message()
                    .split(':')
                    .nth(1)
                    .map(str::trim)
                    .unwrap_or("unknown")
                    .to_string(),
            }
        }
        sqlx::Error::Database(db) if db.message().contains("FOREIGN KEY constraint failed") => {
            RepoError::InvalidInput {
                message: db.message().to_string(),
            }
        }
        sqlx::Error::Database(db) if db.message().contains("constraint failed") => {
            RepoError::Integrity {
                message: db.message().to_string(),
            }
        }
        sqlx::Error::Database(db) if db.message().contains("database is locked") => {
            RepoError::Timeout
        }
        other => RepoError::from_persistence(other),
    }
}
