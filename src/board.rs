pub mod wib;
