//! Wire types shared by the Murmur HTTP layer and its clients.

pub mod api;
pub mod events;
