pub mod source_actor;

pub use source_actor::SourceActor;
