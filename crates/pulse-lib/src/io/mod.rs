pub mod csv;
pub mod history;
pub mod text;
