pub(crate) mod contract;
pub(crate) mod helpers;
pub(crate) mod paths;
pub(crate) mod verify;
