mod pool;
mod utils;
