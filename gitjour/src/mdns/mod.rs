pub mod advertise;
pub mod backend;
pub mod browser;
#[cfg(test)]
pub mod testing;
