pub mod annotation;
pub mod citation;
pub mod entity;
pub mod mention;
pub mod tag;
pub mod utterance;

pub use annotation::*;
pub use citation::*;
pub use entity::*;
pub use mention::*;
pub use tag::*;
pub use utterance::*;
