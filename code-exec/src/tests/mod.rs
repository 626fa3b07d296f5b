mod docker;
mod sandbox;
mod utils;
