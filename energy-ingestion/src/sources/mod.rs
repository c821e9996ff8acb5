pub mod blob_events;
pub mod generator;
pub mod landed_objects;

pub use blob_events::{BlobEventSender, BlobEventSource};
pub use generator::Generator;
pub use landed_objects::LandedObjectsSource;
