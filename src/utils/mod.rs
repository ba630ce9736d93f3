pub mod bit_ops;
pub mod literal;

pub use bit_ops::BitOps;
pub use literal::parse_int_literal;
