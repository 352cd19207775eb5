pub mod db;
pub mod env;
