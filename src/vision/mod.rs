//! Face embedding networks and the image helpers around them.
pub mod backbone;

pub mod image;

pub mod mobilefacenet;

pub mod rev_mobilefacenet;
