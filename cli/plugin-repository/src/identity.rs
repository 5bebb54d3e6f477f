//! Device identification sent with every catalog request.

use std::path::Path;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

use crate::LOG_TARGET;

/// File in the data directory holding the persisted device id.
pub const DEVICE_ID_FILE_NAME: &str = "device-id";

/// Provides the stable identifier sent as `X-Machine-Token`.
pub trait DeviceIdentity {
    fn device_id(&self) -> String;
}

/// A fixed device id, e.g. supplied by the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticDeviceId(pub String);

impl DeviceIdentity for StaticDeviceId {
    fn device_id(&self) -> String {
        self.0.clone()
    }
}

#[derive(Debug, Error)]
pub enum DeviceIdError {
    #[error("could not access device id file")]
    Io(#[from] std::io::Error),
    #[error("device id file does not contain a valid id")]
    Invalid(#[from] uuid::Error),
}

/// A random device id, created once and persisted in the data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistedDeviceId(Uuid);

impl PersistedDeviceId {
    /// Read the device id from `data_dir`, creating a new one if there is none.
    pub async fn load_or_create(data_dir: &Path) -> Result<Self, DeviceIdError> {
        tokio::fs::create_dir_all(data_dir).await?;

        let id_file_path = data_dir.join(DEVICE_ID_FILE_NAME);

        match tokio::fs::File::open(&id_file_path).await {
            Ok(mut id_file) => {
                debug!(target: LOG_TARGET, path = ?id_file_path, "reading device id from file");
                let mut content = String::new();
                id_file.read_to_string(&mut content).await?;
                Ok(Self(Uuid::try_parse(content.trim())?))
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(target: LOG_TARGET, path = ?id_file_path, "creating new device id");
                let uuid = Uuid::new_v4();
                let mut file = tokio::fs::File::create(&id_file_path).await?;
                file.write_all(uuid.to_string().as_bytes()).await?;
                Ok(Self(uuid))
            },
            Err(err) => Err(err.into()),
        }
    }
}

impl DeviceIdentity for PersistedDeviceId {
    fn device_id(&self) -> String {
        self.0.to_string()
    }
}
