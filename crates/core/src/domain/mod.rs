pub mod operator;
pub mod tenant;
pub mod ticket;
