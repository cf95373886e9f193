pub mod appearance;
pub mod commands;
pub mod disabler;
pub mod events;
pub mod locator;
pub mod metadata;
pub mod operation;

pub use commands::EnablePackageCommand;
pub use disabler::PackageDisabler;
pub use events::{EventKind, EventLog};
pub use operation::Operation;
