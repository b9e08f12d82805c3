// Engine modules, leaf-first: input, extraction, decoding, distance, summation, driver.
pub mod accumulate;
pub mod binary;
pub mod decode;
pub mod error;
pub mod extract;
pub mod haversine;
pub mod input;
pub mod pipeline;
