use dfdx::prelude::*;

pub type Dev = AutoDevice;
pub type Dtype = f32;

/// mini-Imagenet images are 84x84.
pub const IMG_SIZE: usize = 84;
/// Classes in the mini-Imagenet train split.
pub const NUM_CLASSES: usize = 64;

pub type ImageShape = (usize, Const<3>, Const<IMG_SIZE>, Const<IMG_SIZE>);

pub type ResidualBlock<const C: usize, const D: usize> = (
    (Conv2D<C, D, 3, 1, 1>, BatchNorm2D<D>, MaxPool2D<3>, ReLU),
    Residual<(Conv2D<D, D, 3, 1, 1>, BatchNorm2D<D>, ReLU)>,
);

pub type SmallResnet<const CLASSES: usize> = (
    (Conv2D<3, 32, 3>, BatchNorm2D<32>, ReLU, MaxPool2D<3>),
    ResidualBlock<32, 64>,
    ResidualBlock<64, 128>,
    ResidualBlock<128, 256>,
    (AvgPoolGlobal, Linear<256, CLASSES>),
);

pub type Classifier = <SmallResnet<NUM_CLASSES> as BuildOnDevice<Dev, Dtype>>::Built;
