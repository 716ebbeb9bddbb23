//! Model evaluation grids shared between spectra.
//!
//! With a shared grid the model is evaluated once and its bin-integrated
//! flux is redistributed onto each effective-area grid, instead of being
//! evaluated once per spectrum.

use crate::common::config::EvalGridConfig;
use crate::domain::{ArfId, SpectrumId, XrespResult};
use crate::numerics::{canonicalize, union_grid, Grid};
use std::fmt::Debug;
use tracing::debug;

pub trait EvalGridStrategy: Debug {
    fn method(&self) -> &'static str;

    /// Grid on which the model is evaluated for all `arf_grids`, or `None`
    /// when every effective area is evaluated on its own grid.
    fn shared_grid(&self, arf_grids: &[&Grid]) -> XrespResult<Option<Grid>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeparateGrids;

impl EvalGridStrategy for SeparateGrids {
    fn method(&self) -> &'static str {
        "separate"
    }

    fn shared_grid(&self, _arf_grids: &[&Grid]) -> XrespResult<Option<Grid>> {
        Ok(None)
    }
}

/// Union of every edge of the member grids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergedGrid;

impl EvalGridStrategy for MergedGrid {
    fn method(&self) -> &'static str {
        "merged"
    }

    fn shared_grid(&self, arf_grids: &[&Grid]) -> XrespResult<Option<Grid>> {
        if arf_grids.len() < 2 {
            return Ok(None);
        }
        Ok(Some(union_grid(arf_grids)?))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserDefinedGrid {
    grid: Grid,
}

impl UserDefinedGrid {
    pub fn new(grid: Grid) -> Self {
        Self { grid }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }
}

impl EvalGridStrategy for UserDefinedGrid {
    fn method(&self) -> &'static str {
        "user_defined"
    }

    fn shared_grid(&self, _arf_grids: &[&Grid]) -> XrespResult<Option<Grid>> {
        Ok(Some(self.grid.clone()))
    }
}

pub fn strategy_from_config(config: &EvalGridConfig) -> XrespResult<Box<dyn EvalGridStrategy>> {
    Ok(match config {
        EvalGridConfig::Separate => Box::new(SeparateGrids),
        EvalGridConfig::Merged => Box::new(MergedGrid),
        EvalGridConfig::UserDefined { lo, hi, unit } => {
            Box::new(UserDefinedGrid::new(canonicalize(lo, hi, *unit)?.grid))
        }
    })
}

/// Spectra and effective areas a shared grid was built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalGridKey {
    members: Vec<(SpectrumId, ArfId)>,
}

impl EvalGridKey {
    pub fn new(mut members: Vec<(SpectrumId, ArfId)>) -> Self {
        members.sort();
        members.dedup();
        Self { members }
    }

    pub fn members(&self) -> &[(SpectrumId, ArfId)] {
        &self.members
    }
}

/// Last shared grid, reused while the member set is unchanged.
#[derive(Debug, Default)]
pub struct EvalGridCache {
    entry: Option<(EvalGridKey, Option<Grid>)>,
}

impl EvalGridCache {
    pub fn get_or_build(
        &mut self,
        key: EvalGridKey,
        strategy: &dyn EvalGridStrategy,
        arf_grids: &[&Grid],
    ) -> XrespResult<Option<&Grid>> {
        let stale = self
            .entry
            .as_ref()
            .is_none_or(|(cached, _)| *cached != key);
        if stale {
            let grid = strategy.shared_grid(arf_grids)?;
            debug!(
                method = strategy.method(),
                members = key.members().len(),
                bins = grid.as_ref().map_or(0, Grid::len),
                "rebuilt model evaluation grid"
            );
            self.entry = Some((key, grid));
        }
        Ok(self.entry.as_ref().and_then(|(_, grid)| grid.as_ref()))
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::{
        strategy_from_config, EvalGridCache, EvalGridKey, EvalGridStrategy, MergedGrid,
        SeparateGrids,
    };
    use crate::common::config::EvalGridConfig;
    use crate::domain::{ArfId, SpectrumId};
    use crate::numerics::{Grid, GridUnit};

    #[test]
    fn merged_grid_is_the_union_of_members() {
        let a = Grid::linear(1.0, 3.0, 2).unwrap();
        let b = Grid::linear(1.5, 2.5, 1).unwrap();
        let shared = MergedGrid.shared_grid(&[&a, &b]).unwrap().unwrap();
        assert_eq!(shared.lo(), &[1.0, 1.5, 2.0, 2.5]);
        assert!(MergedGrid.shared_grid(&[&a]).unwrap().is_none());
        assert!(SeparateGrids.shared_grid(&[&a, &b]).unwrap().is_none());
    }

    #[test]
    fn user_defined_grid_is_canonicalized() {
        let strategy = strategy_from_config(&EvalGridConfig::UserDefined {
            lo: vec![2000.0, 1000.0],
            hi: vec![3000.0, 2000.0],
            unit: GridUnit::Ev,
        })
        .unwrap();
        assert_eq!(strategy.method(), "user_defined");
        let grid = strategy.shared_grid(&[]).unwrap().unwrap();
        assert_eq!(grid.lo(), &[1.0, 2.0]);
    }

    #[test]
    fn cache_rebuilds_only_when_members_change() {
        let a = Grid::linear(1.0, 3.0, 2).unwrap();
        let b = Grid::linear(2.0, 4.0, 2).unwrap();
        let mut cache = EvalGridCache::default();
        let key = || EvalGridKey::new(vec![(SpectrumId(1), ArfId(0)), (SpectrumId(0), ArfId(0))]);

        let first = cache.get_or_build(key(), &MergedGrid, &[&a, &b]).unwrap().cloned();
        assert_eq!(first.as_ref().map(Grid::len), Some(3));
        // same members: stale grids are not consulted
        let again = cache.get_or_build(key(), &MergedGrid, &[&a]).unwrap().cloned();
        assert_eq!(again, first);

        cache.invalidate();
        assert!(cache.is_empty());
        assert!(cache.get_or_build(key(), &MergedGrid, &[&a]).unwrap().is_none());
    }
}
