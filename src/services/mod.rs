// Services module - Business logic

pub mod coordinates;
pub mod lifecycle;
pub mod qr_decoder;
pub mod qr_generator;
pub mod signature;
pub mod token_generator;
