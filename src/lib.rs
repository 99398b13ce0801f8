pub mod acquisition;
pub mod app;
pub mod camera;
pub mod code;
pub mod config;
pub mod console;
pub mod coordinator;
pub mod decode;
pub mod error;
pub mod events;
pub mod fragment;
pub mod frame;
pub mod keyboard_input;
pub mod store;

pub use acquisition::{AcquisitionSource, ScanEvent, SourceFactory, SourceKind};
pub use app::{DataStores, RunOptions, ScanApp, ShutdownReason};
pub use code::{BaggageCode, CodeNormalizer, ValidationPolicy};
pub use config::{BagtagConfig, InputMode};
pub use coordinator::{ScanCommand, ScanCoordinator, ScanFeedback, ScanMode, ScanState};
pub use error::{BagtagError, Result};
pub use events::{BagtagEvent, EventBus, EventFilter, EventReceiver};
pub use fragment::FragmentAssembler;
pub use frame::{FrameData, FrameFormat};
pub use keyboard_input::KeyboardInputHandler;
pub use store::{RecordOutcome, Rejection, SessionId, SessionInfo, TagCounts, TagRecord, TagStore};
