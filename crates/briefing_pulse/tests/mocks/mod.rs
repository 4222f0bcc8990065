pub mod audio;
pub mod blob_store;
pub mod datastore;
pub mod generator;
pub mod notifier;
pub mod progress;
pub mod source_adapter;
