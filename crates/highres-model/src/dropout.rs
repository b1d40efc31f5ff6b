use burn::tensor::{backend::Backend, Distribution, Tensor};

/// Channel-wise dropout.
///
/// Whole feature maps are zeroed with probability `prob` and the survivors
/// rescaled by `1 / (1 - prob)`. Like burn's `Dropout`, the mask is only
/// drawn when the backend records gradients; inference is the identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelDropout {
    pub prob: f64,
}

impl ChannelDropout {
    pub fn new(prob: f64) -> Self {
        Self { prob }
    }

    pub fn forward<B: Backend>(&self, x: Tensor<B, 5>) -> Tensor<B, 5> {
        if !B::ad_enabled() || self.prob == 0.0 {
            return x;
        }
        let [batch, channels, _, _, _] = x.dims();
        let keep = 1.0 - self.prob;
        let mask = Tensor::<B, 5>::random(
            [batch, channels, 1, 1, 1],
            Distribution::Bernoulli(keep),
            &x.device(),
        );
        x * mask.div_scalar(keep)
    }
}
