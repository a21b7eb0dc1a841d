//! Irreducible representations of O(3).
//!
//! An [`Irreps`] value describes how the channels of a feature vector transform
//! under rotations and reflections: an ordered list of `mul x l p` entries, each
//! contributing `mul * (2l + 1)` channels. Features are stored flat with each
//! block laid out `[mul, 2l + 1]`.
//!
//! ```
//! use ferritin_mace::Irreps;
//!
//! let irreps: Irreps = "64x0e + 64x1o + 64x2e".parse().unwrap();
//! assert_eq!(irreps.dim(), 64 * (1 + 3 + 5));
//! ```
use crate::error::IrrepsError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parity {
    Even,
    Odd,
}

impl Parity {
    /// Parity of the spherical harmonics of degree `l`, i.e. `(-1)^l`.
    pub fn of_degree(l: usize) -> Self {
        if l % 2 == 0 {
            Parity::Even
        } else {
            Parity::Odd
        }
    }

    pub fn product(self, other: Parity) -> Parity {
        if self == other {
            Parity::Even
        } else {
            Parity::Odd
        }
    }

    pub fn sign(self) -> i32 {
        match self {
            Parity::Even => 1,
            Parity::Odd => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Irrep {
    pub l: usize,
    pub parity: Parity,
}

impl Irrep {
    pub fn new(l: usize, parity: Parity) -> Self {
        Self { l, parity }
    }

    pub fn scalar() -> Self {
        Self::new(0, Parity::Even)
    }

    /// The irrep carried by the spherical harmonics of degree `l`.
    pub fn spherical_harmonic(l: usize) -> Self {
        Self::new(l, Parity::of_degree(l))
    }

    pub fn dim(&self) -> usize {
        2 * self.l + 1
    }

    pub fn is_scalar(&self) -> bool {
        self.l == 0 && self.parity == Parity::Even
    }

    /// Irreps reachable by coupling `self` with `other`.
    pub fn coupled_with(&self, other: &Irrep) -> impl Iterator<Item = Irrep> {
        let parity = self.parity.product(other.parity);
        let lo = self.l.abs_diff(other.l);
        let hi = self.l + other.l;
        (lo..=hi).map(move |l| Irrep::new(l, parity))
    }

    fn natural_rank(&self) -> u8 {
        if self.parity == Parity::of_degree(self.l) {
            0
        } else {
            1
        }
    }
}

impl Ord for Irrep {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.l, self.natural_rank()).cmp(&(other.l, other.natural_rank()))
    }
}

impl PartialOrd for Irrep {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Irrep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = match self.parity {
            Parity::Even => 'e',
            Parity::Odd => 'o',
        };
        write!(f, "{}{}", self.l, p)
    }
}

impl FromStr for Irrep {
    type Err = IrrepsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let err = || IrrepsError::Parse(s.to_string());
        let (digits, p) = s.split_at(s.len().checked_sub(1).ok_or_else(err)?);
        let l = digits.parse::<usize>().map_err(|_| err())?;
        let parity = match p {
            "e" => Parity::Even,
            "o" => Parity::Odd,
            _ => return Err(err()),
        };
        Ok(Irrep::new(l, parity))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MulIrrep {
    pub mul: usize,
    pub irrep: Irrep,
}

impl MulIrrep {
    pub fn new(mul: usize, irrep: Irrep) -> Self {
        Self { mul, irrep }
    }

    pub fn dim(&self) -> usize {
        self.mul * self.irrep.dim()
    }
}

impl fmt::Display for MulIrrep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.mul, self.irrep)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Irreps(Vec<MulIrrep>);

impl Irreps {
    pub fn new(entries: Vec<MulIrrep>) -> Self {
        Self(entries)
    }

    /// `mul` copies of the invariant scalar, `mul x 0e`.
    pub fn scalars(mul: usize) -> Self {
        Self(vec![MulIrrep::new(mul, Irrep::scalar())])
    }

    /// `1x0e + 1x1o + ... + 1x(lmax)p`, the irreps of the spherical harmonics.
    pub fn spherical_harmonics(lmax: usize) -> Self {
        Self(
            (0..=lmax)
                .map(|l| MulIrrep::new(1, Irrep::spherical_harmonic(l)))
                .collect(),
        )
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MulIrrep> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&MulIrrep> {
        self.0.get(idx)
    }

    /// Total number of channels.
    pub fn dim(&self) -> usize {
        self.0.iter().map(MulIrrep::dim).sum()
    }

    /// Total number of irreps, counting multiplicities.
    pub fn num_irreps(&self) -> usize {
        self.0.iter().map(|m| m.mul).sum()
    }

    pub fn lmax(&self) -> usize {
        self.0.iter().map(|m| m.irrep.l).max().unwrap_or(0)
    }

    /// Number of `0e` channels at the head of the layout.
    pub fn leading_scalars(&self) -> usize {
        self.0
            .iter()
            .take_while(|m| m.irrep.is_scalar())
            .map(|m| m.mul)
            .sum()
    }

    /// `(offset, len)` of every block in the flat layout.
    pub fn slices(&self) -> Vec<(usize, usize)> {
        let mut offset = 0;
        self.0
            .iter()
            .map(|m| {
                let s = (offset, m.dim());
                offset += m.dim();
                s
            })
            .collect()
    }

    /// The list repeated `n` times, `Irreps * n` in the usual notation.
    pub fn repeat(&self, n: usize) -> Self {
        let mut out = Vec::with_capacity(self.0.len() * n);
        for _ in 0..n {
            out.extend(self.0.iter().copied());
        }
        Self(out)
    }

    /// Stable sort by irrep, degree first and natural parity before unnatural.
    pub fn sort(&self) -> Self {
        let mut out = self.0.clone();
        out.sort_by(|a, b| a.irrep.cmp(&b.irrep));
        Self(out)
    }

    /// Merge consecutive equal irreps and drop empty entries.
    pub fn simplify(&self) -> Self {
        let mut out: Vec<MulIrrep> = Vec::with_capacity(self.0.len());
        for m in self.0.iter().filter(|m| m.mul > 0) {
            match out.last_mut() {
                Some(last) if last.irrep == m.irrep => last.mul += m.mul,
                _ => out.push(*m),
            }
        }
        Self(out)
    }

    pub fn concat(&self, other: &Irreps) -> Self {
        let mut out = self.0.clone();
        out.extend(other.0.iter().copied());
        Self(out)
    }

    /// The multiplicity shared by every block, if there is one.
    pub fn uniform_mul(&self) -> Result<usize, IrrepsError> {
        let mut muls = self.0.iter().map(|m| m.mul);
        let first = muls
            .next()
            .ok_or_else(|| IrrepsError::MixedMultiplicity(self.to_string()))?;
        if muls.all(|m| m == first) {
            Ok(first)
        } else {
            Err(IrrepsError::MixedMultiplicity(self.to_string()))
        }
    }

    /// Fails unless a tensor with `actual` channels can carry these irreps.
    pub fn check_dim(&self, actual: usize) -> Result<(), IrrepsError> {
        if self.dim() == actual {
            Ok(())
        } else {
            Err(IrrepsError::DimMismatch {
                irreps: self.to_string(),
                expected: self.dim(),
                actual,
            })
        }
    }
}

impl<'a> IntoIterator for &'a Irreps {
    type Item = &'a MulIrrep;
    type IntoIter = std::slice::Iter<'a, MulIrrep>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Irreps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|m| m.to_string()).collect();
        write!(f, "{}", parts.join("+"))
    }
}

impl FromStr for Irreps {
    type Err = IrrepsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Irreps::default());
        }
        s.split('+')
            .map(|part| {
                let part = part.trim();
                match part.split_once('x') {
                    Some((mul, ir)) => {
                        let mul = mul
                            .trim()
                            .parse::<usize>()
                            .map_err(|_| IrrepsError::Parse(part.to_string()))?;
                        Ok(MulIrrep::new(mul, ir.parse()?))
                    }
                    None => Ok(MulIrrep::new(1, part.parse()?)),
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Irreps)
    }
}

impl TryFrom<String> for Irreps {
    type Error = IrrepsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Irreps> for String {
    fn from(value: Irreps) -> Self {
        value.to_string()
    }
}
