/// Placeholder coverage map.
///
/// Dynamically linked instrumentation may write through the global coverage
/// pointer before the engine has attached its real map. We reserve a dummy
/// region at the address the real map prefers, point the global at it, and
/// hand the address range back once deferred init has been signaled.
use core::num::NonZeroUsize;
use core::ptr::NonNull;

use log::{debug, warn};
use nix::sys::mman::{MapFlags, ProtFlags, mmap_anonymous, munmap};

use crate::error::HarnessError;
use crate::runtime::Runtime;

pub const MAP_BASE_ADDR: usize = 0x10000;
pub const PLACEHOLDER_MAP_SIZE: usize = 256_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOwnership {
    OwnedByHarness,
    ReleasedToEngine,
}

/// Allocation strategies, tried in order until one succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapStrategy {
    /// Exactly this address, never clobbering an existing mapping.
    FixedNoReplace(NonZeroUsize),
    /// This address as a hint only.
    AddressHint(NonZeroUsize),
    /// Wherever the kernel likes.
    Anywhere,
}

impl MapStrategy {
    pub fn preference_list(base: NonZeroUsize) -> [MapStrategy; 3] {
        [
            MapStrategy::FixedNoReplace(base),
            MapStrategy::AddressHint(base),
            MapStrategy::Anywhere,
        ]
    }
}

pub trait MapBackend {
    fn map(
        &mut self,
        strategy: MapStrategy,
        len: NonZeroUsize,
    ) -> Result<NonNull<u8>, HarnessError>;
    fn unmap(&mut self, region: NonNull<u8>, len: usize) -> Result<(), HarnessError>;
}

/// Anonymous shared `mmap`.
#[derive(Debug, Default)]
pub struct MmapBackend;

impl MapBackend for MmapBackend {
    fn map(
        &mut self,
        strategy: MapStrategy,
        len: NonZeroUsize,
    ) -> Result<NonNull<u8>, HarnessError> {
        let prot = ProtFlags::PROT_READ | ProtFlags::PROT_WRITE;
        let flags = MapFlags::MAP_SHARED | MapFlags::MAP_ANONYMOUS;
        let region = match strategy {
            MapStrategy::FixedNoReplace(addr) => {
                let flags = flags | fixed_noreplace();
                let region = unsafe { mmap_anonymous(Some(addr), len, prot, flags) }?;
                // Kernels predating the flag treat it as a plain hint.
                if region.as_ptr() as usize != addr.get() {
                    unsafe { munmap(region, len.get()) }?;
                    return Err(HarnessError::MapMisplaced {
                        expected: addr.get(),
                        actual: region.as_ptr() as usize,
                    });
                }
                region
            }
            MapStrategy::AddressHint(addr) => {
                unsafe { mmap_anonymous(Some(addr), len, prot, flags) }?
            }
            MapStrategy::Anywhere => unsafe { mmap_anonymous(None, len, prot, flags) }?,
        };
        Ok(region.cast())
    }

    fn unmap(&mut self, region: NonNull<u8>, len: usize) -> Result<(), HarnessError> {
        unsafe { munmap(region.cast(), len) }?;
        Ok(())
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn fixed_noreplace() -> MapFlags {
    MapFlags::MAP_FIXED_NOREPLACE
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn fixed_noreplace() -> MapFlags {
    MapFlags::from_bits_retain(0x100000)
}

#[derive(Debug)]
pub struct CoverageMap<B = MmapBackend> {
    backend: B,
    base: NonZeroUsize,
    len: NonZeroUsize,
    region: Option<NonNull<u8>>,
    /// The runtime's coverage pointer currently holds `region`.
    published: bool,
    ownership: MapOwnership,
}

impl CoverageMap<MmapBackend> {
    pub fn new() -> Self {
        Self::with_backend(MmapBackend)
    }
}

impl Default for CoverageMap<MmapBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: MapBackend> CoverageMap<B> {
    pub fn with_backend(backend: B) -> Self {
        Self::with_layout(backend, MAP_BASE_ADDR, PLACEHOLDER_MAP_SIZE)
    }

    /// # Panics
    /// If `base` or `len` is zero.
    pub fn with_layout(backend: B, base: usize, len: usize) -> Self {
        Self {
            backend,
            base: NonZeroUsize::new(base).expect("map base must be non-zero"),
            len: NonZeroUsize::new(len).expect("map size must be non-zero"),
            region: None,
            published: false,
            ownership: MapOwnership::OwnedByHarness,
        }
    }

    /// Map the placeholder and seed the runtime's coverage pointer with it.
    ///
    /// When every strategy fails the pointer stays null; instrumentation that
    /// attaches later is then expected to fail loudly on its own.
    pub fn reserve<R: Runtime>(&mut self, runtime: &mut R) -> Option<NonNull<u8>> {
        if self.ownership == MapOwnership::ReleasedToEngine {
            warn!("coverage map already released to the engine, not reserving again");
            return None;
        }
        if let Some(region) = self.region {
            return Some(region);
        }

        for strategy in MapStrategy::preference_list(self.base) {
            match self.backend.map(strategy, self.len) {
                Ok(region) => {
                    debug!("placeholder map reserved with {strategy:?} at {:p}", region.as_ptr());
                    runtime.publish_area(region.as_ptr());
                    self.region = Some(region);
                    self.published = true;
                    return Some(region);
                }
                Err(err) => debug!("placeholder map strategy {strategy:?} failed: {err}"),
            }
        }

        warn!("could not reserve a placeholder coverage map");
        None
    }

    /// Take the placeholder out of the runtime's coverage pointer while
    /// keeping it mapped. The runtime must see a null pointer when it attaches
    /// its real map. Idempotent.
    pub fn retract<R: Runtime>(&mut self, runtime: &mut R) {
        if !self.published {
            return;
        }
        if let Some(region) = self.region {
            runtime.retract_area(region.as_ptr());
        }
        self.published = false;
    }

    /// Retract the placeholder if still published, then unmap it. Idempotent.
    pub fn release<R: Runtime>(&mut self, runtime: &mut R) {
        self.retract(runtime);
        let Some(region) = self.region.take() else {
            return;
        };
        if let Err(err) = self.backend.unmap(region, self.len.get()) {
            warn!("failed to unmap placeholder map at {:p}: {err}", region.as_ptr());
        }
        self.ownership = MapOwnership::ReleasedToEngine;
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.region.map_or(core::ptr::null_mut(), NonNull::as_ptr)
    }

    pub fn ownership(&self) -> MapOwnership {
        self.ownership
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::StandaloneRuntime;

    /// Backend failing the first `failures` attempts and recording everything.
    #[derive(Default)]
    struct ScriptedBackend {
        failures: usize,
        attempts: Vec<MapStrategy>,
        unmapped: Vec<usize>,
        storage: Vec<Box<[u8]>>,
    }

    impl MapBackend for ScriptedBackend {
        fn map(
            &mut self,
            strategy: MapStrategy,
            len: NonZeroUsize,
        ) -> Result<NonNull<u8>, HarnessError> {
            self.attempts.push(strategy);
            if self.attempts.len() <= self.failures {
                return Err(HarnessError::Map(nix::Error::EEXIST));
            }
            let mut block = vec![0u8; len.get()].into_boxed_slice();
            let region = NonNull::new(block.as_mut_ptr()).unwrap();
            self.storage.push(block);
            Ok(region)
        }

        fn unmap(&mut self, region: NonNull<u8>, _len: usize) -> Result<(), HarnessError> {
            self.unmapped.push(region.as_ptr() as usize);
            Ok(())
        }
    }

    fn scripted(failures: usize) -> CoverageMap<ScriptedBackend> {
        CoverageMap::with_layout(ScriptedBackend { failures, ..Default::default() }, 0x10000, 64)
    }

    #[test]
    fn first_successful_strategy_wins() {
        let mut map = scripted(0);
        let mut rt = StandaloneRuntime::new();

        let region = map.reserve(&mut rt).unwrap();
        assert_eq!(map.backend().attempts.len(), 1);
        assert!(matches!(map.backend().attempts[0], MapStrategy::FixedNoReplace(_)));
        assert_eq!(rt.area(), Some(region.as_ptr()));
    }

    #[test]
    fn strategies_are_tried_in_preference_order() {
        let mut map = scripted(2);
        let mut rt = StandaloneRuntime::new();

        assert!(map.reserve(&mut rt).is_some());
        let base = NonZeroUsize::new(0x10000).unwrap();
        assert_eq!(map.backend().attempts, MapStrategy::preference_list(base).to_vec());
    }

    #[test]
    fn all_strategies_failing_leaves_null_pointer() {
        let mut map = scripted(3);
        let mut rt = StandaloneRuntime::new();

        assert!(map.reserve(&mut rt).is_none());
        assert!(map.as_ptr().is_null());
        assert_eq!(rt.area(), None);
    }

    #[test]
    fn release_is_idempotent_and_final() {
        let mut map = scripted(0);
        let mut rt = StandaloneRuntime::new();
        let region = map.reserve(&mut rt).unwrap();

        map.release(&mut rt);
        map.release(&mut rt);
        assert_eq!(map.backend().unmapped, vec![region.as_ptr() as usize]);
        assert_eq!(map.ownership(), MapOwnership::ReleasedToEngine);
        assert_eq!(rt.area(), None);

        assert!(map.reserve(&mut rt).is_none());
        assert_eq!(map.backend().attempts.len(), 1);
    }

    #[test]
    fn retract_keeps_the_region_mapped() {
        let mut map = scripted(0);
        let mut rt = StandaloneRuntime::new();
        let region = map.reserve(&mut rt).unwrap();

        map.retract(&mut rt);
        assert_eq!(rt.area(), None);
        assert_eq!(map.as_ptr(), region.as_ptr());
        assert!(map.backend().unmapped.is_empty());
        assert_eq!(map.ownership(), MapOwnership::OwnedByHarness);

        // A map attached by the runtime in the meantime is left alone.
        let mut real = [0u8; 4];
        rt.publish_area(real.as_mut_ptr());
        map.release(&mut rt);
        assert_eq!(rt.area(), Some(real.as_mut_ptr()));
        assert_eq!(map.backend().unmapped, vec![region.as_ptr() as usize]);
    }

    #[test]
    fn release_without_reservation_is_a_noop() {
        let mut map = scripted(3);
        let mut rt = StandaloneRuntime::new();
        map.reserve(&mut rt);
        map.release(&mut rt);
        assert!(map.backend().unmapped.is_empty());
    }

    #[test]
    fn real_mmap_reserve_and_release() {
        let mut map = CoverageMap::new();
        let mut rt = StandaloneRuntime::new();

        let region = map.reserve(&mut rt).expect("anonymous mapping should succeed");
        unsafe {
            region.as_ptr().write(1);
            region.as_ptr().add(PLACEHOLDER_MAP_SIZE - 1).write(1);
        }
        map.release(&mut rt);
        assert!(map.as_ptr().is_null());
    }
}
