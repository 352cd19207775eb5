pub mod fuzzy;
pub mod slug;
pub mod tags;
