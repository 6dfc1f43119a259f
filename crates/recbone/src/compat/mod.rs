//! Compat code; helpers that paper over gaps in ``burn``.

pub mod conv_shape;
