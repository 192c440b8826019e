//! Native observation and action spaces.
//!
//! Converted from the server's [`SpaceDescriptor`]s at connect time. Converting a space back
//! yields the descriptor it came from: a bound left out by the server is represented as an
//! all-infinite bound and left out again on the way back.

use rand::Rng;
use rand_distr::{Distribution, Exp1, StandardNormal};

use crate::error::{BridgeError, Result};
use crate::protocol::SpaceDescriptor;

/// Discrete space with `n` possible values: {0, 1, ..., n-1}
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Discrete {
    n: u64,
}

impl Discrete {
    /// Create a discrete space. `n` must be at least 1.
    pub fn new(n: u64) -> Result<Self> {
        if n == 0 {
            return Err(BridgeError::invalid_space(
                "discrete space must have at least 1 element",
            ));
        }
        Ok(Self { n })
    }

    /// Number of choices
    pub fn n(&self) -> u64 {
        self.n
    }
}

/// Box space: a real vector with elementwise bounds, stored flattened in row-major order
#[derive(Clone, Debug, PartialEq)]
pub struct BoxSpace {
    shape: Vec<usize>,
    low: Vec<f32>,
    high: Vec<f32>,
}

impl BoxSpace {
    /// Largest number of scalar elements a box space may hold.
    pub const MAX_ELEMENTS: usize = 1 << 24;

    /// Create a box space. Missing bounds are -inf / +inf elementwise.
    ///
    /// # Errors
    /// Returns [`BridgeError::InvalidSpace`] when the shape holds more than
    /// [`BoxSpace::MAX_ELEMENTS`] elements, when a bound does not have one entry per element
    /// or when some `low` exceeds its `high`.
    pub fn new(shape: Vec<usize>, low: Option<Vec<f32>>, high: Option<Vec<f32>>) -> Result<Self> {
        let size = shape
            .iter()
            .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
            .filter(|&size| size <= Self::MAX_ELEMENTS)
            .ok_or_else(|| {
                BridgeError::invalid_space(format!(
                    "shape {shape:?} exceeds {} elements",
                    Self::MAX_ELEMENTS
                ))
            })?;
        let low = low.unwrap_or_else(|| vec![f32::NEG_INFINITY; size]);
        let high = high.unwrap_or_else(|| vec![f32::INFINITY; size]);

        if low.len() != size || high.len() != size {
            return Err(BridgeError::invalid_space(format!(
                "shape {shape:?} has {size} elements but low has {} and high has {}",
                low.len(),
                high.len()
            )));
        }
        if let Some(i) = (0..size).find(|&i| low[i] > high[i]) {
            return Err(BridgeError::invalid_space(format!(
                "low[{i}] = {} exceeds high[{i}] = {}",
                low[i], high[i]
            )));
        }
        Ok(Self { shape, low, high })
    }

    /// Dimension sizes
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Flattened lower bounds
    pub fn low(&self) -> &[f32] {
        &self.low
    }

    /// Flattened upper bounds
    pub fn high(&self) -> &[f32] {
        &self.high
    }

    /// Number of scalar elements
    pub fn size(&self) -> usize {
        self.low.len()
    }

    /// True if `value` has one entry per element and every entry lies within its bounds.
    pub fn contains(&self, value: &[f32]) -> bool {
        value.len() == self.size()
            && value
                .iter()
                .zip(self.low.iter().zip(self.high.iter()))
                .all(|(&v, (&l, &h))| v >= l && v <= h)
    }

    /// Sample a vector from the space.
    ///
    /// Bounded dimensions are sampled uniformly, half-bounded ones as the finite bound offset by
    /// an exponential sample, unbounded ones from a standard normal distribution.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Vec<f32> {
        self.low
            .iter()
            .zip(self.high.iter())
            .map(|(&l, &h)| match (l.is_finite(), h.is_finite()) {
                (true, true) if l == h => l,
                (true, true) if (h - l).is_finite() => rng.gen_range(l..=h),
                (true, true) => {
                    // the width overflows f32, walk it in two halves
                    let half = h / 2.0 - l / 2.0;
                    let u: f32 = rng.gen();
                    (l + half * u + half * u).clamp(l, h)
                }
                (true, false) => {
                    let offset: f32 = Exp1.sample(rng);
                    l + offset
                }
                (false, true) => {
                    let offset: f32 = Exp1.sample(rng);
                    h - offset
                }
                (false, false) => StandardNormal.sample(rng),
            })
            .collect()
    }
}

/// Space of one agent's observations or actions.
#[derive(Clone, Debug, PartialEq)]
pub enum Space {
    /// Discrete choice
    Discrete(Discrete),
    /// Bounded real vector
    Box(BoxSpace),
}

impl Space {
    /// Shape of a sample. Discrete spaces have an empty shape.
    pub fn shape(&self) -> &[usize] {
        match self {
            Space::Discrete(_) => &[],
            Space::Box(b) => b.shape(),
        }
    }

    /// Length of the flattened sample: 1 for discrete spaces.
    pub fn flat_dim(&self) -> usize {
        match self {
            Space::Discrete(_) => 1,
            Space::Box(b) => b.size(),
        }
    }

    /// Number of choices of a discrete space.
    pub fn n(&self) -> Option<u64> {
        match self {
            Space::Discrete(d) => Some(d.n()),
            Space::Box(_) => None,
        }
    }

    /// Sample a flattened value. Discrete samples are a single index.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Vec<f32> {
        match self {
            Space::Discrete(d) => vec![rng.gen_range(0..d.n()) as f32],
            Space::Box(b) => b.sample(rng),
        }
    }

    /// True if the flattened `value` belongs to the space.
    pub fn contains(&self, value: &[f32]) -> bool {
        match self {
            Space::Discrete(d) => match value {
                [v] => v.fract() == 0.0 && *v >= 0.0 && (*v as u64) < d.n(),
                _ => false,
            },
            Space::Box(b) => b.contains(value),
        }
    }

    /// Wire descriptor of the space.
    pub fn to_descriptor(&self) -> SpaceDescriptor {
        match self {
            Space::Discrete(d) => SpaceDescriptor::discrete(d.n()),
            Space::Box(b) => {
                let low = (!b.low.iter().all(|&l| l == f32::NEG_INFINITY)).then(|| b.low.clone());
                let high = (!b.high.iter().all(|&h| h == f32::INFINITY)).then(|| b.high.clone());
                SpaceDescriptor::bounded(b.shape.clone(), low, high)
            }
        }
    }
}

impl TryFrom<SpaceDescriptor> for Space {
    type Error = BridgeError;

    fn try_from(desc: SpaceDescriptor) -> Result<Self> {
        match (desc.n, desc.shape) {
            (Some(n), None) => {
                if desc.low.is_some() || desc.high.is_some() {
                    return Err(BridgeError::invalid_space(
                        "discrete space must not carry bounds",
                    ));
                }
                Ok(Space::Discrete(Discrete::new(n)?))
            }
            (None, Some(shape)) => Ok(Space::Box(BoxSpace::new(shape, desc.low, desc.high)?)),
            (Some(_), Some(_)) => Err(BridgeError::invalid_space(
                "descriptor has both 'n' and 'shape'",
            )),
            (None, None) => Err(BridgeError::invalid_space(
                "descriptor has neither 'n' nor 'shape'",
            )),
        }
    }
}

impl From<&Space> for SpaceDescriptor {
    fn from(space: &Space) -> Self {
        space.to_descriptor()
    }
}
