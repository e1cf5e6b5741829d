mod batch;
mod blob;
mod commit_point;
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

pub use self::{
    batch::*, blob::*, commit_point::*, data::*, event::*, group::*, message::*, next_pin::*,
    nonce::*, offset::*, operation::*, pin::*, subscription::*, tokens::*, transaction::*,
};
