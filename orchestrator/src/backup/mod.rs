//! Point-in-time backups of the application stack on its target host
//!
//! One directory per backup under the backup root, holding a database dump,
//! a cache snapshot, an archive of the data directories, copies of the
//! configuration files and a `metadata.json` describing the rest.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::deploy::compose::ComposeStack;
use crate::errors::OrchestratorError;
use crate::readiness::{wait_until_ready, Probe, ReadinessOptions};
use crate::storage::settings::AppSettings;
use crate::utils::shell_quote;

pub const METADATA_FILE: &str = "metadata.json";
pub const META_BEGIN: &str = "__STACKPILOT_META_BEGIN__";
pub const META_END: &str = "__STACKPILOT_META_END__";

const DATABASE_DUMP: &str = "database.sql";
const CACHE_SNAPSHOT: &str = "cache.rdb";
const DATA_ARCHIVE: &str = "data.tar.gz";
const CONFIG_DIR: &str = "config";

/// Why a backup was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupKind {
    Manual,
    PreUpdate,
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupKind::Manual => write!(f, "manual"),
            BackupKind::PreUpdate => write!(f, "pre-update"),
        }
    }
}

/// Metadata describing one backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: BackupKind,
    pub application_version: String,
    pub size_bytes: u64,
    /// Directory on the target; derived from the id, not stored in the metadata file
    #[serde(default, skip_serializing)]
    pub storage_path: String,
}

/// Identifier for a backup taken at `at`, to the millisecond
pub fn backup_id(at: DateTime<Utc>) -> String {
    format!("backup-{}", at.format("%Y%m%d-%H%M%S-%3f"))
}

fn validate_id(id: &str) -> Result<(), OrchestratorError> {
    let valid = id.starts_with("backup-")
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(OrchestratorError::BackupNotFound(id.to_string()))
    }
}

/// Text between each pair of metadata markers in `stdout`
pub fn metadata_blocks(stdout: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = stdout;
    while let Some(start) = rest.find(META_BEGIN) {
        let after = &rest[start + META_BEGIN.len()..];
        match after.find(META_END) {
            Some(end) => {
                blocks.push(after[..end].trim());
                rest = &after[end + META_END.len()..];
            }
            None => break,
        }
    }
    blocks
}

/// Tag of an image reference, `latest` when untagged
pub fn image_tag(image: &str) -> String {
    let without_digest = image.split('@').next().unwrap_or(image);
    match without_digest.rsplit_once(':') {
        Some((_, tag)) if !tag.contains('/') && !tag.is_empty() => tag.to_string(),
        _ => "latest".to_string(),
    }
}

/// Creates, lists, restores and deletes backups through a [`ComposeStack`]
#[derive(Clone)]
pub struct BackupManager {
    stack: ComposeStack,
    app: AppSettings,
    readiness: ReadinessOptions,
}

impl BackupManager {
    pub fn new(stack: ComposeStack, app: AppSettings, readiness: ReadinessOptions) -> Self {
        Self {
            stack,
            app,
            readiness,
        }
    }

    pub fn backup_dir(&self, id: &str) -> String {
        format!("{}/{}", self.app.backup_root.trim_end_matches('/'), id)
    }

    async fn execute(&self, script: &str) -> Result<String, OrchestratorError> {
        let output = self
            .stack
            .executor()
            .execute(self.stack.target(), script)
            .await?;
        Ok(output.stdout)
    }

    async fn application_version(&self) -> String {
        match self.stack.image_of(&self.app.app_service).await {
            Ok(Some(image)) => image_tag(&image),
            Ok(None) => "unknown".to_string(),
            Err(e) => {
                debug!("Could not read application image: {}", e);
                "unknown".to_string()
            }
        }
    }

    /// Single script performing every part of a backup and echoing its metadata
    pub fn create_script(&self, id: &str, timestamp: DateTime<Utc>, kind: BackupKind, version: &str) -> String {
        let dir = shell_quote(&self.backup_dir(id));
        let app_dir = shell_quote(&self.app.remote_dir);
        let db = &self.app.database;
        let dump = self.stack.compose_command(&format!(
            "exec -T {} pg_dump --clean --if-exists -U {} -d {}",
            shell_quote(&db.service),
            shell_quote(&db.user),
            shell_quote(&db.name)
        ));
        let cache_save = self
            .stack
            .compose_command(&format!("exec -T {} redis-cli SAVE", shell_quote(&self.app.cache_service)));
        let cache_copy = self.stack.compose_command(&format!(
            "cp {}:/data/dump.rdb {}/{}",
            shell_quote(&self.app.cache_service),
            dir,
            CACHE_SNAPSHOT
        ));
        let data_dirs = self
            .app
            .data_dirs
            .iter()
            .map(|d| shell_quote(d))
            .collect::<Vec<_>>()
            .join(" ");
        let config_files = self
            .app
            .config_files
            .iter()
            .map(|f| shell_quote(f))
            .collect::<Vec<_>>()
            .join(" ");
        let metadata = format!(
            r#"{{"id":"{}","timestamp":"{}","type":"{}","application_version":"{}","size_bytes":%s}}"#,
            id,
            timestamp.to_rfc3339(),
            kind,
            version.replace('"', "")
        );

        format!(
            r#"set -e
BACKUP_DIR={dir}
if [ -e "$BACKUP_DIR" ]; then
  echo "backup directory $BACKUP_DIR already exists" >&2
  exit 1
fi
mkdir -p "$BACKUP_DIR/{config_dir}"
{dump} > "$BACKUP_DIR/{db_dump}"
{cache_save} >/dev/null
{cache_copy}
cd {app_dir}
DATA=""
for d in {data_dirs}; do
  if [ -e "$d" ]; then DATA="$DATA $d"; fi
done
if [ -n "$DATA" ]; then tar -czf "$BACKUP_DIR/{data_archive}" $DATA; fi
for f in {config_files}; do
  if [ -e "$f" ]; then cp -a --parents "$f" "$BACKUP_DIR/{config_dir}/"; fi
done
SIZE=$(du -sb "$BACKUP_DIR" | cut -f1)
printf '{metadata}\n' "$SIZE" > "$BACKUP_DIR/{metadata_file}"
echo {begin}
cat "$BACKUP_DIR/{metadata_file}"
echo {end}
"#,
            config_dir = CONFIG_DIR,
            db_dump = DATABASE_DUMP,
            data_archive = DATA_ARCHIVE,
            metadata_file = METADATA_FILE,
            begin = META_BEGIN,
            end = META_END,
        )
    }

    /// Take a backup. Metadata that cannot be read back is replaced by a
    /// record built from what is known locally.
    pub async fn create(&self, kind: BackupKind) -> Result<BackupRecord, OrchestratorError> {
        let timestamp = Utc::now();
        let id = backup_id(timestamp);
        let version = self.application_version().await;
        info!("Creating {} backup {} (version {})", kind, id, version);

        let stdout = self
            .execute(&self.create_script(&id, timestamp, kind, &version))
            .await?;

        let parsed = metadata_blocks(&stdout)
            .first()
            .ok_or_else(|| OrchestratorError::Metadata("no metadata in output".to_string()))
            .and_then(|block| serde_json::from_str::<BackupRecord>(block).map_err(Into::into));
        let mut record = match parsed {
            Ok(record) => record,
            Err(e) => {
                warn!("Backup {} metadata unreadable ({}), using local record", id, e);
                BackupRecord {
                    id: id.clone(),
                    timestamp,
                    kind,
                    application_version: version,
                    size_bytes: 0,
                    storage_path: String::new(),
                }
            }
        };
        record.storage_path = self.backup_dir(&record.id);
        info!("Backup {} created ({} bytes)", record.id, record.size_bytes);
        Ok(record)
    }

    /// Every readable backup, newest first. Directories without readable
    /// metadata are skipped.
    pub async fn list(&self) -> Result<Vec<BackupRecord>, OrchestratorError> {
        let root = shell_quote(self.app.backup_root.trim_end_matches('/'));
        let script = format!(
            r#"for d in {root}/backup-*; do
  [ -d "$d" ] || continue
  echo {begin}
  cat "$d/{metadata_file}" 2>/dev/null || true
  echo
  echo {end}
done
"#,
            begin = META_BEGIN,
            end = META_END,
            metadata_file = METADATA_FILE,
        );
        let stdout = self.execute(&script).await?;

        let mut records: Vec<BackupRecord> = metadata_blocks(&stdout)
            .into_iter()
            .filter_map(|block| match serde_json::from_str::<BackupRecord>(block) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!("Skipping backup with unreadable metadata: {}", e);
                    None
                }
            })
            .map(|mut record| {
                record.storage_path = self.backup_dir(&record.id);
                record
            })
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    /// Read one backup's metadata, failing when the backup does not exist
    pub async fn get(&self, id: &str) -> Result<BackupRecord, OrchestratorError> {
        validate_id(id)?;
        let dir = shell_quote(&self.backup_dir(id));
        let script = format!(
            "test -d {dir} && test -f {dir}/{file} && echo {begin} && cat {dir}/{file} && echo && echo {end}",
            file = METADATA_FILE,
            begin = META_BEGIN,
            end = META_END,
        );
        let stdout = match self.execute(&script).await {
            Ok(stdout) => stdout,
            Err(OrchestratorError::CommandFailed { .. }) => {
                return Err(OrchestratorError::BackupNotFound(id.to_string()))
            }
            Err(e) => return Err(e),
        };
        let block = metadata_blocks(&stdout)
            .first()
            .copied()
            .ok_or_else(|| OrchestratorError::BackupNotFound(id.to_string()))?;
        let mut record: BackupRecord = serde_json::from_str(block)
            .map_err(|e| OrchestratorError::Metadata(format!("{}: {}", id, e)))?;
        record.storage_path = self.backup_dir(id);
        Ok(record)
    }

    /// Restore a backup and wait for every service to run again.
    ///
    /// Order: verify, stop, config and data files, start, database, cache,
    /// restart, wait.
    pub async fn restore(&self, id: &str) -> Result<BackupRecord, OrchestratorError> {
        let record = self.get(id).await?;
        let dir = shell_quote(&record.storage_path);
        let app_dir = shell_quote(&self.app.remote_dir);
        info!("Restoring backup {} ({})", record.id, record.application_version);

        self.stack.stop().await?;

        let data_dirs = self
            .app
            .data_dirs
            .iter()
            .map(|d| shell_quote(d))
            .collect::<Vec<_>>()
            .join(" ");
        let files = format!(
            r#"set -e
cd {app_dir}
if [ -d {dir}/{config_dir} ]; then cp -a {dir}/{config_dir}/. {app_dir}/; fi
if [ -f {dir}/{archive} ]; then
  rm -rf {data_dirs}
  tar -xzf {dir}/{archive} -C {app_dir}
fi
"#,
            config_dir = CONFIG_DIR,
            archive = DATA_ARCHIVE,
        );
        self.execute(&files).await?;
        debug!("Restored configuration and data files");

        self.stack.up().await?;

        self.wait_database().await?;
        let db = &self.app.database;
        let restore_db = format!(
            "{} < {}/{}",
            self.stack.compose_command(&format!(
                "exec -T {} psql -q -v ON_ERROR_STOP=1 -U {} -d {}",
                shell_quote(&db.service),
                shell_quote(&db.user),
                shell_quote(&db.name)
            )),
            dir,
            DATABASE_DUMP
        );
        self.execute(&restore_db).await?;
        debug!("Restored database");

        let cache = shell_quote(&self.app.cache_service);
        let restore_cache = format!(
            "if [ -f {dir}/{snapshot} ]; then {stop} && {copy} && {start}; fi",
            snapshot = CACHE_SNAPSHOT,
            stop = self.stack.compose_command(&format!("stop {}", cache)),
            copy = self.stack.compose_command(&format!(
                "cp {}/{} {}:/data/dump.rdb",
                dir, CACHE_SNAPSHOT, cache
            )),
            start = self.stack.compose_command(&format!("start {}", cache)),
        );
        self.execute(&restore_cache).await?;
        debug!("Restored cache");

        self.stack.restart().await?;
        self.stack.wait_running(&self.readiness).await?;
        info!("Backup {} restored", record.id);
        Ok(record)
    }

    async fn probe_database(&self) -> Probe {
        let db = &self.app.database;
        let command = format!(
            "pg_isready -U {} -d {}",
            shell_quote(&db.user),
            shell_quote(&db.name)
        );
        match self.stack.exec(&db.service, &command).await {
            Ok(_) => Probe::Ready,
            Err(e) => Probe::NotReady(e.to_string()),
        }
    }

    async fn wait_database(&self) -> Result<(), OrchestratorError> {
        wait_until_ready(&self.readiness, || self.probe_database())
            .await
            .into_result("database")
    }

    /// Remove a backup directory
    pub async fn delete(&self, id: &str) -> Result<(), OrchestratorError> {
        let record = self.get(id).await?;
        self.execute(&format!("rm -rf {}", shell_quote(&record.storage_path)))
            .await?;
        info!("Deleted backup {}", record.id);
        Ok(())
    }
}
