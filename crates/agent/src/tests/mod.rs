pub(crate) mod support;

mod routing;
mod streaming;
