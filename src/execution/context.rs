//! Serving tiles of an initialized operator.
//!
//! After initialization an operator lives inside an [`OperatorContext`]:
//! - Target bands computed by the operator are backed by a
//!   [`MultiLevelImage`] whose levels are mosaicked from operator tiles
//! - Tiles are computed through the [`TileCache`], once per band group and tile
//! - Stack operators are asked once per tile for all of their bands

use crate::core::error::{
    ConfigurationError, ConfigurationResult, IndexError, TileComputationError, TileGraphError, TileGraphResult,
};
use crate::core::operator::{OperatorKind, TileRequest};
use crate::core::raster::{Raster, TileGrid, TileIndex};
use crate::execution::cache::{TileCache, TileKey, TileSet};
use crate::execution::config::ExecutionConfig;
use crate::execution::scheduler::{BandGroup, BandGroupKind};
use crate::level::{MultiLevelImage, MultiLevelModel, MultiLevelSource};
use crate::product::{Band, RasterProduct};
use std::fmt;
use std::sync::{Arc, Weak};

/// Tile size and per-level tile grids of a target product.
#[derive(Debug, Clone, PartialEq)]
pub struct TileLayout {
    model: MultiLevelModel,
    grids: Vec<TileGrid>,
}

impl TileLayout {
    /// Resolve the tiling of `product` under `config`.
    pub fn new(product: &RasterProduct, config: &ExecutionConfig) -> ConfigurationResult<Self> {
        let (tile_width, tile_height) =
            config.resolve_tile_size(product.width(), product.height(), product.preferred_tile_size());
        let base = TileGrid::new(product.width(), product.height(), tile_width, tile_height)?;
        let model = product.multi_level_model(tile_width, tile_height)?;
        let mut grids = vec![base];
        for level in 1..model.level_count() {
            let (width, height) = model
                .level_size(level)
                .map_err(|e| ConfigurationError::Other(e.to_string()))?;
            grids.push(TileGrid::new(width, height, tile_width, tile_height)?);
        }
        Ok(Self { model, grids })
    }

    /// Pyramid geometry of the target bands.
    pub fn model(&self) -> &MultiLevelModel {
        &self.model
    }

    pub fn tile_width(&self) -> u32 {
        self.grids[0].tile_width()
    }

    pub fn tile_height(&self) -> u32 {
        self.grids[0].tile_height()
    }

    /// Tile grid of level 0.
    pub fn base_grid(&self) -> &TileGrid {
        &self.grids[0]
    }

    /// Tile grid of a level.
    pub fn grid(&self, level: usize) -> Result<&TileGrid, IndexError> {
        self.grids.get(level).ok_or(IndexError::LevelOutOfRange {
            level,
            level_count: self.grids.len(),
        })
    }
}

/// An initialized operator together with its target product and tile cache.
pub struct OperatorContext {
    alias: String,
    operator: OperatorKind,
    target: Arc<RasterProduct>,
    layout: TileLayout,
    groups: Vec<BandGroup>,
    cache: TileCache,
}

impl OperatorContext {
    /// Take ownership of an initialized operator.
    ///
    /// Attaches an operator-driven image to every target band that has no
    /// source image yet.
    pub fn new(
        operator: OperatorKind,
        product: RasterProduct,
        layout: TileLayout,
        config: &ExecutionConfig,
    ) -> Arc<Self> {
        let alias = operator.metadata().alias;
        let groups = band_groups(&operator, &product);
        let target = Arc::new(product);
        let cache = TileCache::with_memory_limit(config.cache_capacity, config.cache_memory_mb);

        Arc::new_cyclic(|weak: &Weak<OperatorContext>| {
            for group in groups.iter().filter(|g| g.kind != BandGroupKind::Source) {
                for name in &group.bands {
                    if let Some(band) = target.band(name) {
                        let source = OperatorMultiLevelSource {
                            context: weak.clone(),
                            band: name.clone(),
                            model: layout.model().clone(),
                        };
                        band.set_source_image(Arc::new(MultiLevelImage::new(Arc::new(source))));
                    }
                }
            }
            Self {
                alias,
                operator,
                target,
                layout,
                groups,
                cache,
            }
        })
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn operator(&self) -> &OperatorKind {
        &self.operator
    }

    pub fn target_product(&self) -> &Arc<RasterProduct> {
        &self.target
    }

    pub fn layout(&self) -> &TileLayout {
        &self.layout
    }

    /// Band groups in product band order.
    pub fn groups(&self) -> &[BandGroup] {
        &self.groups
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    /// Index of the group containing `band`.
    pub fn group_of(&self, band: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.contains(band))
    }

    /// Make sure a tile of a band group is available.
    ///
    /// Computed groups go through the tile cache; source groups force the
    /// band's own image level.
    pub fn realize(&self, group: usize, level: usize, tile: TileIndex) -> Result<(), TileComputationError> {
        let band_group = self.band_group(group, level, tile)?;
        match band_group.kind {
            BandGroupKind::Source => {
                for name in &band_group.bands {
                    let band = self
                        .target
                        .require_band(name)
                        .map_err(|e| TileComputationError::new(name.as_str(), tile, level, e))?;
                    band.read_level(level)
                        .map_err(|e| TileComputationError::new(name.as_str(), tile, level, e))?;
                }
                Ok(())
            }
            BandGroupKind::PerTile | BandGroupKind::Stack => self.tile_set(band_group, level, tile).map(|_| ()),
        }
    }

    /// A computed tile of one band.
    pub fn tile(&self, band: &str, level: usize, tile: TileIndex) -> TileGraphResult<Arc<Raster>> {
        let group = self.group_of(band).ok_or_else(|| ConfigurationError::UnknownBand {
            product: self.target.name().to_string(),
            band: band.to_string(),
        })?;
        let band_group = &self.groups[group];
        if band_group.kind == BandGroupKind::Source {
            let rect = self.layout.grid(level)?.tile_rect(tile)?;
            return Ok(Arc::new(self.target.require_band(band)?.read_tile(level, &rect)?));
        }
        let tiles = self.tile_set(band_group, level, tile)?;
        tiles
            .get(band)
            .cloned()
            .ok_or_else(|| TileComputationError::new(band, tile, level, "band missing from computed tile set").into())
    }

    /// Full rendering of a computed band at `level`, assembled from its tiles.
    pub fn mosaic(&self, band: &str, level: usize) -> TileGraphResult<Raster> {
        let grid = *self.layout.grid(level)?;
        let data_type = self.target.require_band(band)?.data_type();
        log::debug!(
            "Mosaicking band '{}' of '{}' at level {} from {} tiles",
            band,
            self.alias,
            level,
            grid.tile_count()
        );
        let mut raster = Raster::new(grid.width(), grid.height(), data_type);
        for tile in grid.tiles() {
            let rect = grid.tile_rect(tile)?;
            let data = self.tile(band, level, tile)?;
            raster.paste(rect.x, rect.y, &data);
        }
        Ok(raster)
    }

    fn band_group(&self, group: usize, level: usize, tile: TileIndex) -> Result<&BandGroup, TileComputationError> {
        self.groups.get(group).ok_or_else(|| {
            TileComputationError::new(
                format!("group #{}", group),
                tile,
                level,
                format!("operator '{}' has {} band groups", self.alias, self.groups.len()),
            )
        })
    }

    fn tile_set(&self, group: &BandGroup, level: usize, tile: TileIndex) -> Result<Arc<TileSet>, TileComputationError> {
        let fail = |e: TileGraphError| TileComputationError::new(group.label(), tile, level, e);
        let rect = self
            .layout
            .grid(level)
            .map_err(|e| fail(e.into()))?
            .tile_rect(tile)
            .map_err(|e| fail(e.into()))?;
        let request = TileRequest { tile, level, rect };

        self.cache
            .get_or_compute(TileKey::new(group.index, level, tile), || {
                self.compute(group, &request).map_err(|e| match e {
                    TileGraphError::TileComputation(inner) => inner,
                    other => fail(other),
                })
            })
            .inspect_err(|e| log::warn!("{}", e))
    }

    fn compute(&self, group: &BandGroup, request: &TileRequest) -> TileGraphResult<TileSet> {
        let bands = group
            .bands
            .iter()
            .map(|name| self.target.require_band(name).cloned())
            .collect::<ConfigurationResult<Vec<Arc<Band>>>>()?;

        let mut tiles = TileSet::new();
        match (&self.operator, group.kind) {
            (OperatorKind::PerTile(op), BandGroupKind::PerTile) => {
                for band in &bands {
                    let raster = op.compute_tile(band, request)?;
                    check_tile_size(band.name(), &raster, request)?;
                    tiles.insert(band.name().to_string(), Arc::new(raster));
                }
            }
            (OperatorKind::Stack(op), BandGroupKind::Stack) => {
                let mut computed = op.compute_tile_stack(&bands, request)?;
                for band in &bands {
                    let raster = computed.swap_remove(band.name()).ok_or_else(|| {
                        TileComputationError::new(
                            band.name(),
                            request.tile,
                            request.level,
                            "stack operator did not produce this band",
                        )
                    })?;
                    check_tile_size(band.name(), &raster, request)?;
                    tiles.insert(band.name().to_string(), Arc::new(raster));
                }
            }
            (_, kind) => {
                return Err(TileGraphError::illegal_state(
                    "compute tile",
                    format!("band group kind {:?} does not match operator '{}'", kind, self.alias),
                ))
            }
        }
        Ok(tiles)
    }
}

impl fmt::Debug for OperatorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorContext")
            .field("alias", &self.alias)
            .field("target", &self.target.name())
            .field("groups", &self.groups)
            .field("cached_tiles", &self.cache.len())
            .finish()
    }
}

fn check_tile_size(band: &str, raster: &Raster, request: &TileRequest) -> Result<(), TileComputationError> {
    if raster.width() != request.rect.width || raster.height() != request.rect.height {
        return Err(TileComputationError::new(
            band,
            request.tile,
            request.level,
            format!(
                "operator returned {}x{} samples for a {}x{} tile",
                raster.width(),
                raster.height(),
                request.rect.width,
                request.rect.height
            ),
        ));
    }
    Ok(())
}

/// Partition the target bands into band groups.
///
/// Source-backed bands form their own groups. Computed bands of a stack
/// operator share one group placed at the first computed band; computed
/// bands of a per-tile operator get one group each.
fn band_groups(operator: &OperatorKind, product: &RasterProduct) -> Vec<BandGroup> {
    let computed: Vec<String> = product
        .bands()
        .filter(|b| !b.has_source_image())
        .map(|b| b.name().to_string())
        .collect();

    let mut groups: Vec<BandGroup> = Vec::new();
    let mut stack_emitted = false;
    for band in product.bands() {
        let name = band.name().to_string();
        let (kind, bands) = if band.has_source_image() {
            (BandGroupKind::Source, vec![name])
        } else if operator.is_stack() {
            if stack_emitted {
                continue;
            }
            stack_emitted = true;
            (BandGroupKind::Stack, computed.clone())
        } else {
            (BandGroupKind::PerTile, vec![name])
        };
        groups.push(BandGroup {
            index: groups.len(),
            kind,
            bands,
        });
    }
    groups
}

/// Level renderings of a computed band, mosaicked from operator tiles.
struct OperatorMultiLevelSource {
    context: Weak<OperatorContext>,
    band: String,
    model: MultiLevelModel,
}

impl MultiLevelSource for OperatorMultiLevelSource {
    fn model(&self) -> &MultiLevelModel {
        &self.model
    }

    fn create_image(&self, level: usize) -> TileGraphResult<Arc<Raster>> {
        self.model.check_level(level)?;
        let context = self.context.upgrade().ok_or_else(|| {
            TileGraphError::illegal_state(
                format!("render band '{}'", self.band),
                "the producing operator has been dropped",
            )
        })?;
        Ok(Arc::new(context.mosaic(&self.band, level)?))
    }

    /// Drop the cached tiles of this band's group.
    fn reset(&self) {
        if let Some(context) = self.context.upgrade() {
            if let Some(group) = context.group_of(&self.band) {
                log::debug!("Dropping cached tiles of band group #{} of '{}'", group, context.alias());
                context.cache().invalidate_group(group);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::operator::{Operator, OperatorMetadata, OperatorNode, PerTileOperator, StackOperator};
    use crate::core::types::DataType;
    use indexmap::IndexMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes `column * 100 + row` into every pixel of a tile.
    struct TileIds {
        calls: Arc<AtomicUsize>,
        passthrough: bool,
    }

    impl Operator for TileIds {
        fn metadata(&self) -> OperatorMetadata {
            OperatorMetadata::builder("TileIds").build()
        }

        fn initialize(&mut self) -> ConfigurationResult<RasterProduct> {
            let mut product = RasterProduct::new("ids", "test", 10, 6).with_preferred_tile_size(4, 4);
            product.add_band(Band::new("a", DataType::Int32, 10, 6))?;
            if self.passthrough {
                product.add_band(Band::from_raster("src", Raster::filled(10, 6, DataType::UInt8, 9.0), 2)?)?;
            }
            product.add_band(Band::new("b", DataType::Int32, 10, 6))?;
            Ok(product)
        }
    }

    impl PerTileOperator for TileIds {
        fn compute_tile(&self, band: &Band, request: &TileRequest) -> TileGraphResult<Raster> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let id = (request.tile.column * 100 + request.tile.row) as f64;
            Ok(Raster::filled(request.rect.width, request.rect.height, band.data_type(), id))
        }
    }

    impl StackOperator for TileIds {
        fn compute_tile_stack(
            &self,
            bands: &[Arc<Band>],
            request: &TileRequest,
        ) -> TileGraphResult<IndexMap<String, Raster>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(bands
                .iter()
                .map(|b| {
                    let raster = Raster::filled(request.rect.width, request.rect.height, b.data_type(), 1.0);
                    (b.name().to_string(), raster)
                })
                .collect())
        }
    }

    fn initialized(kind: impl FnOnce(TileIds) -> OperatorKind, passthrough: bool) -> (OperatorNode, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let op = TileIds {
            calls: calls.clone(),
            passthrough,
        };
        let mut node = OperatorNode::new(kind(op));
        node.initialize().unwrap();
        (node, calls)
    }

    #[test]
    fn test_layout_uses_preferred_tile_size() {
        let (node, _) = initialized(|op| OperatorKind::PerTile(Box::new(op)), false);
        let layout = node.context().unwrap().layout().clone();
        assert_eq!((layout.tile_width(), layout.tile_height()), (4, 4));
        assert_eq!((layout.base_grid().columns(), layout.base_grid().rows()), (3, 2));
        assert_eq!(layout.model().level_count(), 3);
        assert!(layout.grid(3).is_err());
    }

    #[test]
    fn test_band_groups() {
        let (node, _) = initialized(|op| OperatorKind::PerTile(Box::new(op)), true);
        let groups = node.context().unwrap().groups();
        let kinds: Vec<_> = groups.iter().map(|g| g.kind).collect();
        assert_eq!(kinds, vec![BandGroupKind::PerTile, BandGroupKind::Source, BandGroupKind::PerTile]);

        let (node, _) = initialized(|op| OperatorKind::Stack(Box::new(op)), true);
        let groups = node.context().unwrap().groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].kind, BandGroupKind::Stack);
        assert_eq!(groups[0].bands, vec!["a", "b"]);
        assert_eq!(groups[1].bands, vec!["src"]);
        assert_eq!(groups[1].index, 1);
    }

    #[test]
    fn test_mosaic_from_tiles() {
        let (node, calls) = initialized(|op| OperatorKind::PerTile(Box::new(op)), false);
        let product = node.target_product().unwrap();
        let band = product.band("a").unwrap();

        let level0 = band.read_level(0).unwrap();
        assert_eq!((level0.width(), level0.height()), (10, 6));
        assert_eq!(level0.sample(0, 0), 0.0);
        assert_eq!(level0.sample(9, 5), 201.0);
        assert_eq!(calls.load(Ordering::SeqCst), 6);

        // a second read is served from the level cache
        band.read_level(0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 6);

        // a reset drops the band's tiles as well
        band.source_image().unwrap().reset();
        assert!(!node.context().unwrap().cache().contains(&TileKey::new(0, 0, TileIndex::new(0, 0))));
        band.read_level(0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 12);

        let level1 = band.read_level(1).unwrap();
        assert_eq!((level1.width(), level1.height()), (5, 3));
        assert_eq!(level1.sample(4, 0), 100.0);
    }

    #[test]
    fn test_stack_tiles_are_computed_once_for_all_bands() {
        let (node, calls) = initialized(|op| OperatorKind::Stack(Box::new(op)), false);
        let context = node.context().unwrap();
        for tile in context.layout().base_grid().tiles() {
            context.realize(0, 0, tile).unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 6);

        let product = node.target_product().unwrap();
        assert!(product.band("b").unwrap().read_level(0).unwrap().samples().iter().all(|&v| v == 1.0));
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_realize_out_of_range() {
        let (node, _) = initialized(|op| OperatorKind::PerTile(Box::new(op)), false);
        let context = node.context().unwrap();
        let err = context.realize(0, 0, TileIndex::new(3, 0)).unwrap_err();
        assert_eq!(err.band, "a");
        assert!(context.realize(7, 0, TileIndex::new(0, 0)).is_err());
        assert!(context.tile("missing", 0, TileIndex::new(0, 0)).is_err());
    }
}
