pub mod config;
pub mod error;
pub mod server;
pub mod supervisor;

pub use config::{
    load_relay_config, PathsSection, RelayConfig, ServerSection, SupervisorSection,
    TranscoderSection,
};
pub use error::{ConfigError, Result};
pub use server::{
    router, serve, AppState, ArtifactError, ControlResponse, OutcomeStatus, Overlay,
    OverlayError, OverlayKind, OverlayStore, ServerError, StatusReport,
};
pub use supervisor::{
    SessionSnapshot, SessionStatus, Started, StopOutcome, StreamSupervisor, SupervisorError,
    SupervisorSettings, SystemLauncher, TranscodeInvocation, TranscoderLauncher,
    PUBLIC_PLAYLIST_PATH,
};
