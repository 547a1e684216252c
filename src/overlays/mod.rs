pub mod animation;
pub mod attachment;
pub mod companion;
pub mod cursor;
pub mod dodge;
pub mod events;
pub mod interactions;
