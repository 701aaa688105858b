use crate::MscopeError;
use crate::config::MscopeConfig;
use crate::keys::SessionKey;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};

/// Root data directories: MSCOPE_ROOT_DATA_DIR (OS path-list syntax) wins over config.
pub fn root_data_dirs(config: &MscopeConfig) -> Vec<PathBuf> {
    if let Some(value) = std::env::var_os("MSCOPE_ROOT_DATA_DIR")
        && !value.is_empty()
    {
        return std::env::split_paths(&value)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
    }
    config.custom.miniscope_root_data_dir.clone()
}

/// First `root/rel` that exists on disk.
pub fn find_full_path(roots: &[PathBuf], rel: &Path) -> Result<PathBuf, MscopeError> {
    if roots.is_empty() {
        return Err(MscopeError::Config(
            "no miniscope root data directories configured".into(),
        ));
    }
    roots
        .iter()
        .map(|root| root.join(rel))
        .find(|candidate| candidate.exists())
        .ok_or_else(|| {
            MscopeError::NotFound(format!(
                "{} not found under any root data directory",
                rel.display()
            ))
        })
}

/// The configured root containing `full`.
pub fn find_root_directory<'a>(roots: &'a [PathBuf], full: &Path) -> Result<&'a Path, MscopeError> {
    if roots.is_empty() {
        return Err(MscopeError::Config(
            "no miniscope root data directories configured".into(),
        ));
    }
    roots
        .iter()
        .find(|root| full.starts_with(root))
        .map(PathBuf::as_path)
        .ok_or_else(|| {
            MscopeError::NotFound(format!(
                "no root data directory contains {}",
                full.display()
            ))
        })
}

/// `full` relative to the root that contains it, or unchanged if no root does.
pub fn relative_to_root(roots: &[PathBuf], full: &Path) -> PathBuf {
    match find_root_directory(roots, full) {
        Ok(root) => full.strip_prefix(root).map(Path::to_path_buf).unwrap_or_else(|_| full.to_path_buf()),
        Err(_) => full.to_path_buf(),
    }
}

pub fn session_directory(conn: &Connection, key: &SessionKey) -> Result<String, MscopeError> {
    conn.query_row(
        "SELECT session_dir FROM session_directory WHERE subject = ?1 AND session_datetime = ?2",
        params![key.subject, key.session_datetime],
        |r| r.get(0),
    )
    .optional()?
    .ok_or_else(|| MscopeError::NotFound(format!("session directory for {key}")))
}

/// Display form with forward slashes, as stored in the database.
pub fn to_posix(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_existing_root_wins() {
        let a = tempfile::TempDir::new().unwrap();
        let b = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(b.path().join("subject1/session1")).unwrap();
        std::fs::create_dir_all(a.path().join("other")).unwrap();

        let roots = vec![a.path().to_path_buf(), b.path().to_path_buf()];
        let found = find_full_path(&roots, Path::new("subject1/session1")).unwrap();
        assert_eq!(found, b.path().join("subject1/session1"));
    }

    #[test]
    fn missing_path_is_not_found() {
        let a = tempfile::TempDir::new().unwrap();
        let roots = vec![a.path().to_path_buf()];
        let err = find_full_path(&roots, Path::new("nope"));
        assert!(matches!(err, Err(MscopeError::NotFound(_))));
    }

    #[test]
    fn no_roots_is_config_error() {
        let err = find_full_path(&[], Path::new("subject1"));
        assert!(matches!(err, Err(MscopeError::Config(_))));
    }

    #[test]
    fn root_directory_and_relative() {
        let roots = vec![PathBuf::from("/data/raw"), PathBuf::from("/data/proc")];
        let full = Path::new("/data/proc/subject1/session1/caiman");
        assert_eq!(find_root_directory(&roots, full).unwrap(), Path::new("/data/proc"));
        assert_eq!(
            relative_to_root(&roots, full),
            PathBuf::from("subject1/session1/caiman")
        );
        assert_eq!(
            relative_to_root(&roots, Path::new("/elsewhere/x")),
            PathBuf::from("/elsewhere/x")
        );
    }

    #[test]
    fn session_directory_lookup() {
        let conn = crate::db::open_in_memory().unwrap();
        conn.execute_batch(
            "INSERT INTO subject (subject, sex, subject_birth_date) VALUES ('s1', 'M', '2021-01-01');
             INSERT INTO session (subject, session_datetime) VALUES ('s1', '2021-06-01 10:00:00');
             INSERT INTO session_directory (subject, session_datetime, session_dir)
                 VALUES ('s1', '2021-06-01 10:00:00', 's1/2021-06-01');",
        )
        .unwrap();
        let key = SessionKey {
            subject: "s1".into(),
            session_datetime: "2021-06-01 10:00:00".into(),
        };
        assert_eq!(session_directory(&conn, &key).unwrap(), "s1/2021-06-01");

        let other = SessionKey {
            subject: "s1".into(),
            session_datetime: "2021-06-02 10:00:00".into(),
        };
        assert!(matches!(session_directory(&conn, &other), Err(MscopeError::NotFound(_))));
    }

    #[test]
    fn posix_display() {
        assert_eq!(to_posix(Path::new("subject1/session1")), "subject1/session1");
        assert_eq!(to_posix(Path::new("/abs/dir")), "/abs/dir");
    }
}
