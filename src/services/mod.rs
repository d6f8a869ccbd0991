pub mod playlist;
pub mod resolver;
pub mod safety;
pub mod sync;
