//! # Convolution Shape Utilities
//!
//! Utilities for computing the output shape of convolution and pooling operations.
//!
//! Floor-mode pooling follows the same arithmetic as convolution,
//! so every spatial layer in the backbones can be predicted from its config.

use burn::nn::PaddingConfig2d;

/// Predict the output size of a 1D convolution operation.
///
/// ```text
/// out_size = floor( ((in_size + 2*padding - dilation*(kernel_size-1) - 1) / stride) + 1 )
/// ```
///
/// # Reference
///
/// - [conv_arithmetic diagram](https://github.com/vdumoulin/conv_arithmetic/blob/master/README.md)
///   visual explanations of these convolution parameters.
/// - [pytorch conv1d](https://docs.pytorch.org/docs/stable/generated/torch.nn.Conv1d.html)
///
/// # Arguments
///
/// - `input_size`: The input dimension size.
/// - `kernel_size`: The kernel size, must be > 0.
/// - `stride`: The stride of the convolution, must be > 0.
/// - `padding`: The padding of the convolution, added evenly to both sides of the input.
/// - `dilation`: The dilation of the convolution, must be > 0.
///
/// # Returns
///
/// An `Option<usize>` representing the output size; or `None` for <= 0.
pub fn maybe_conv1d_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> Option<usize> {
    assert!(kernel_size > 0);
    assert!(stride > 0);
    assert!(dilation > 0);

    if input_size == 0 {
        return None;
    }

    let pos = input_size + 2 * padding + stride;
    let kernel_width = 1 + dilation * (kernel_size - 1);

    if pos < kernel_width {
        return None;
    }
    let x = (pos - kernel_width) / stride;
    if x < 1 { None } else { Some(x) }
}

/// Predict the output size of a 1D convolution operation.
///
/// This is the ``panic``-ing variant of [`maybe_conv1d_output_size`].
///
/// # Panics
///
/// If the output size would be <= 0.
pub fn expect_conv1d_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> usize {
    match maybe_conv1d_output_size(input_size, kernel_size, stride, padding, dilation) {
        Some(x) => x,
        None => panic!(
            "No legal output size for conv1d with:\n input_size:{input_size}\n kernel_size:{kernel_size}\n stride:{stride}\n dilation:{dilation}\n padding:{padding}",
        ),
    }
}

/// Predict the output shape of a D convolution operation.
///
/// This is the generalization of [`maybe_conv1d_output_size`] to D dimensions;
/// each dimension carries its own kernel, stride, padding and dilation.
///
/// # Returns
///
/// An `Option<[usize; D]>` representing the output shape; or `None` if any dim is <= 0.
pub fn maybe_conv_output_shape<const D: usize>(
    input_shape: [usize; D],
    kernel_shape: [usize; D],
    stride: [usize; D],
    padding: [usize; D],
    dilation: [usize; D],
) -> Option<[usize; D]> {
    let mut output_shape = input_shape;
    for i in 0..D {
        output_shape[i] = maybe_conv1d_output_size(
            input_shape[i],
            kernel_shape[i],
            stride[i],
            padding[i],
            dilation[i],
        )?;
    }
    Some(output_shape)
}

/// Predict the output shape of a D convolution operation.
///
/// This is the ``panic``-ing variant of [`maybe_conv_output_shape`].
///
/// # Panics
///
/// If any output dim would be <= 0.
pub fn expect_conv_output_shape<const D: usize>(
    input_shape: [usize; D],
    kernel_shape: [usize; D],
    stride: [usize; D],
    padding: [usize; D],
    dilation: [usize; D],
) -> [usize; D] {
    match maybe_conv_output_shape(input_shape, kernel_shape, stride, padding, dilation) {
        Some(shape) => shape,
        None => panic!(
            "No legal output size for conv with:\n input_shape:{input_shape:?}\n kernel_shape:{kernel_shape:?}\n stride:{stride:?}\n dilation:{dilation:?}\n padding:{padding:?}",
        ),
    }
}

/// Resolve a [`PaddingConfig2d`] to per-axis ``[height, width]`` padding.
///
/// `Same` is resolved for stride 1, as ``burn`` does.
pub fn padding_to_pair(
    padding: &PaddingConfig2d,
    kernel_size: [usize; 2],
) -> [usize; 2] {
    match padding {
        PaddingConfig2d::Valid => [0, 0],
        PaddingConfig2d::Same => [(kernel_size[0] - 1) / 2, (kernel_size[1] - 1) / 2],
        PaddingConfig2d::Explicit(height, width) => [*height, *width],
    }
}

/// Predict the output resolution of a floor-mode 2d pooling layer.
///
/// # Arguments
///
/// - `input_resolution`: ``[in_height, in_width]``.
/// - `kernel_size`: the pool window.
/// - `strides`: the pool strides.
/// - `padding`: the pool padding config.
///
/// # Returns
///
/// ``Some([out_height, out_width])``; or `None` if the input does not survive the pool.
pub fn maybe_pool2d_output_resolution(
    input_resolution: [usize; 2],
    kernel_size: [usize; 2],
    strides: [usize; 2],
    padding: &PaddingConfig2d,
) -> Option<[usize; 2]> {
    maybe_conv_output_shape(
        input_resolution,
        kernel_size,
        strides,
        padding_to_pair(padding, kernel_size),
        [1, 1],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conv1d_output_shape() {
        pub fn conv1d_output_size_reference(
            input_shape: usize,
            kernel_shape: usize,
            stride: usize,
            padding: usize,
            dilation: usize,
        ) -> Option<usize> {
            let input_shape = input_shape as f64;
            let kernel_shape = kernel_shape as f64;
            let stride = stride as f64;
            let dilation = dilation as f64;
            let padding = padding as f64;

            let effective_shape = input_shape + 2.0 * padding;
            let kernel_width = 1.0 + dilation * (kernel_shape - 1.0);

            let x = (((effective_shape - kernel_width) / stride) + 1.0).floor();
            if x < 1.0 { None } else { Some(x as usize) }
        }

        for input_shape in 1..10 {
            for stride in 1..3 {
                for kernel_shape in 1..6 {
                    for padding in 0..4 {
                        assert_eq!(
                            maybe_conv1d_output_size(input_shape, kernel_shape, stride, padding, 1),
                            conv1d_output_size_reference(input_shape, kernel_shape, stride, padding, 1),
                        )
                    }
                }
            }
        }
    }

    #[test]
    fn test_zero_input_has_no_output() {
        assert_eq!(maybe_conv1d_output_size(0, 1, 1, 0, 1), None);
    }

    #[test]
    #[should_panic(expected = "No legal output size for conv1d")]
    fn test_expect_conv1d_output_size_panics() {
        expect_conv1d_output_size(1, 3, 1, 0, 1);
    }

    #[test]
    fn test_padding_to_pair() {
        assert_eq!(padding_to_pair(&PaddingConfig2d::Valid, [3, 3]), [0, 0]);
        assert_eq!(padding_to_pair(&PaddingConfig2d::Same, [5, 3]), [2, 1]);
        assert_eq!(
            padding_to_pair(&PaddingConfig2d::Explicit(0, 1), [2, 2]),
            [0, 1]
        );
    }

    #[test]
    fn test_text_line_pool_preserves_width() {
        // kernel 2x2, stride (2, 1), padding (0, 1): height halves, width grows by one.
        assert_eq!(
            maybe_pool2d_output_resolution(
                [8, 80],
                [2, 2],
                [2, 1],
                &PaddingConfig2d::Explicit(0, 1)
            ),
            Some([4, 81])
        );
        assert_eq!(
            maybe_pool2d_output_resolution([1, 80], [2, 2], [2, 2], &PaddingConfig2d::Valid),
            None
        );
    }
}
