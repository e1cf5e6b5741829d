mod batch;
mod blob;
mod data;
mod event;
mod group;
mod message;
mod next_pin;
mod nonce;
mod offset;
mod operation;
mod pin;
mod subscription;
mod tokens;
mod transaction;
