mod types;

pub use types::{
    CertificateSettings, ConfigError, RemotePaths, RotationConfig, RotationOrder,
    RotationSettings, SshConfig,
};
