use secrecy::SecretString;
use std::path::PathBuf;
use url::Url;

/// Which collaborator strategy the process talks to.
#[derive(Clone)]
pub enum BackendTarget {
    /// In-process fakes with the seeded registry and a demo voter.
    Mock,
    /// Hosted functions and auth APIs.
    Live {
        functions_url: Url,
        auth_url: Url,
        anon_key: SecretString,
    },
}

#[derive(Clone)]
pub struct GlobalArgs {
    pub target: BackendTarget,
    pub storage_path: PathBuf,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(target: BackendTarget, storage_path: PathBuf) -> Self {
        Self {
            target,
            storage_path,
        }
    }

    #[must_use]
    pub fn is_mock(&self) -> bool {
        matches!(self.target, BackendTarget::Mock)
    }
}

impl std::fmt::Debug for BackendTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mock => f.write_str("Mock"),
            Self::Live {
                functions_url,
                auth_url,
                ..
            } => f
                .debug_struct("Live")
                .field("functions_url", &functions_url.as_str())
                .field("auth_url", &auth_url.as_str())
                .field("anon_key", &"***")
                .finish(),
        }
    }
}

impl std::fmt::Debug for GlobalArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalArgs")
            .field("target", &self.target)
            .field("storage_path", &self.storage_path)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_global_args_debug_redacts_anon_key() {
        let args = GlobalArgs::new(
            BackendTarget::Live {
                functions_url: Url::parse("https://api.sovs.local/functions/v1/").unwrap(),
                auth_url: Url::parse("https://api.sovs.local/auth/v1/").unwrap(),
                anon_key: SecretString::from("anon-secret".to_string()),
            },
            PathBuf::from("/tmp/sovs.json"),
        );

        let debug = format!("{args:?}");
        assert!(debug.contains("***"));
        assert!(debug.contains("functions/v1"));
        assert!(!debug.contains("anon-secret"));
        assert!(!args.is_mock());

        let BackendTarget::Live { anon_key, .. } = &args.target else {
            panic!("expected live target");
        };
        assert_eq!(anon_key.expose_secret(), "anon-secret");
    }

    #[test]
    fn test_global_args_mock() {
        let args = GlobalArgs::new(BackendTarget::Mock, PathBuf::from("state.json"));
        assert!(args.is_mock());
        assert_eq!(format!("{:?}", args.target), "Mock");
    }
}
