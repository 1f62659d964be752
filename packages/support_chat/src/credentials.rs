use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::debug;

use chat_sync::{AccessToken, Role, UserId};

use crate::api::LoginResponse;

/// What a successful login leaves behind in the data directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: AccessToken,
    pub user_id: UserId,
    pub role: Role,
}

impl From<LoginResponse> for Credentials {
    fn from(login: LoginResponse) -> Self {
        Self {
            access_token: login.access_token,
            user_id: login.user.user_id,
            role: login.user.role,
        }
    }
}

impl Credentials {
    /// `Ok(None)` when nobody is logged in.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read credentials: {:?}", path))?;
        let creds = serde_json::from_str(&raw)
            .with_context(|| format!("Corrupt credentials file: {:?}", path))?;
        Ok(Some(creds))
    }

    /// Write the file readable by the owner only. The token never lands
    /// in a file with wider permissions, even when one already exists.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(path)
            .with_context(|| format!("Failed to write credentials: {:?}", path))?;

        // `mode` only applies on creation; tighten a pre-existing file before writing
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to restrict credentials: {:?}", path))?;
        }

        file.write_all(json.as_bytes())
            .with_context(|| format!("Failed to write credentials: {:?}", path))?;

        debug!("Saved credentials to {}", path.display());
        Ok(())
    }

    /// Delete stored credentials. Returns whether a file was removed.
    pub fn clear(path: &Path) -> Result<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove credentials: {:?}", path)),
        }
    }
}
