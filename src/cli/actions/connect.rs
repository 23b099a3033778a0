//! Builds the collaborator strategy selected on the command line.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::debug;

use crate::backend::auth::AuthClient;
use crate::backend::file::FileStorage;
use crate::backend::http::FunctionsClient;
use crate::backend::memory::InMemoryBackends;
use crate::backend::{Backends, DurableStorage};
use crate::cli::globals::{BackendTarget, GlobalArgs};
use crate::login::otp::{Delivery, LocalPasscodes, MemoryOtpStore, PasscodeAuthority, ProviderPasscodes};

/// Collaborators plus the passcode authority matching them.
pub struct Connection {
    pub backends: Backends,
    pub passcodes: Arc<dyn PasscodeAuthority>,
    /// Locally issued passcodes; only set for the mock backend.
    pub deliveries: Option<mpsc::UnboundedReceiver<Delivery>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("backends", &self.backends)
            .field("local_passcodes", &self.deliveries.is_some())
            .finish_non_exhaustive()
    }
}

/// Connect to the selected backend. Storage is always the JSON file so
/// drafts and sessions survive between runs.
///
/// # Errors
/// Returns an error if an HTTP client cannot be built or the mock registry
/// cannot be seeded.
pub async fn connect(globals: &GlobalArgs) -> Result<Connection> {
    let storage: Arc<dyn DurableStorage> = Arc::new(FileStorage::new(&globals.storage_path));

    match &globals.target {
        BackendTarget::Live {
            functions_url,
            auth_url,
            anon_key,
        } => {
            debug!(%functions_url, %auth_url, "using live backend");
            let functions = Arc::new(
                FunctionsClient::new(functions_url.clone(), anon_key.clone())
                    .context("failed to build functions client")?,
            );
            let auth = Arc::new(
                AuthClient::new(auth_url.clone(), anon_key.clone())
                    .context("failed to build auth client")?,
            );

            let backends = Backends {
                storage,
                verification: functions.clone(),
                documents: functions.clone(),
                records: functions.clone(),
                auth: auth.clone(),
                users: functions,
            };

            Ok(Connection {
                backends,
                passcodes: Arc::new(ProviderPasscodes::new(auth)),
                deliveries: None,
            })
        }
        BackendTarget::Mock => {
            debug!("using mock backend");
            let fakes = InMemoryBackends::new()
                .with_demo_voter()
                .await
                .context("failed to seed the mock backend")?;

            let mut backends = fakes.backends();
            backends.storage = storage;

            let (passcodes, deliveries) = LocalPasscodes::new(Arc::new(MemoryOtpStore::new()));
            Ok(Connection {
                backends,
                passcodes: Arc::new(passcodes),
                deliveries: Some(deliveries),
            })
        }
    }
}
