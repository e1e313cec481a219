use std::collections::{BTreeMap, HashMap};

use crate::bins::Bin;
use crate::compute::{ComputeBackend, FftPlan};
use crate::error::{Result, XpcsError};

/// Per-bin FFT plans, owned by one spectral correlator.
///
/// The padded transform length of every bin is fixed when the cache is
/// built; plans are created on demand and can be evicted individually or all
/// at once to bound memory.
pub struct PlanCache {
    sizes: BTreeMap<Bin, usize>,
    plans: HashMap<Bin, FftPlan>,
    retain: bool,
}

impl PlanCache {
    /// `retain = false` turns the cache into a pass-through: plans are built
    /// for one use and released afterwards.
    pub fn new(sizes: BTreeMap<Bin, usize>, retain: bool) -> Self {
        Self {
            sizes,
            plans: HashMap::new(),
            retain,
        }
    }

    pub fn padded_len(&self, bin: Bin) -> Result<usize> {
        self.sizes
            .get(&bin)
            .copied()
            .ok_or(XpcsError::UnknownBin(bin))
    }

    pub fn is_cached(&self, bin: Bin) -> bool {
        self.plans.contains_key(&bin)
    }

    pub fn cached_count(&self) -> usize {
        self.plans.len()
    }

    pub fn retains_plans(&self) -> bool {
        self.retain
    }

    /// Plan for `bin`, creating it on the backend when missing.
    pub fn get_or_create(
        &mut self,
        bin: Bin,
        backend: &dyn ComputeBackend,
    ) -> Result<&mut FftPlan> {
        let size = self.padded_len(bin)?;
        if !self.plans.contains_key(&bin) {
            tracing::debug!(%bin, size, backend = backend.name(), "creating FFT plan");
            let plan = backend.plan_fft(size)?;
            self.plans.insert(bin, plan);
        }
        self.plans
            .get_mut(&bin)
            .ok_or_else(|| XpcsError::Resource(format!("FFT plan for bin {bin} vanished")))
    }

    /// Drop the plan of `bin` after use unless plans are retained.
    pub fn release(&mut self, bin: Bin) {
        if !self.retain {
            self.plans.remove(&bin);
        }
    }

    /// Evict one plan, or every plan when `bin` is `None`.
    pub fn flush(&mut self, bin: Option<Bin>) -> Result<()> {
        match bin {
            Some(bin) => {
                self.padded_len(bin)?;
                if self.plans.remove(&bin).is_some() {
                    tracing::debug!(%bin, "flushed FFT plan");
                }
            }
            None => {
                tracing::debug!(count = self.plans.len(), "flushed all FFT plans");
                self.plans.clear();
            }
        }
        Ok(())
    }
}
