//! Render toggles and the map statistics snapshot shared with the HUD.

use bitflags::bitflags;

/// One render toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderFlag {
    ShowStats,
    Wireframe,
    ShowLightmaps,
    UseLightmaps,
    AlphaTest,
    SkipMissingTex,
    SkipPvs,
    SkipFrustumCulling,
    Multisampling,
}

impl RenderFlag {
    pub const ALL: [RenderFlag; 9] = [
        RenderFlag::ShowStats,
        RenderFlag::Wireframe,
        RenderFlag::ShowLightmaps,
        RenderFlag::UseLightmaps,
        RenderFlag::AlphaTest,
        RenderFlag::SkipMissingTex,
        RenderFlag::SkipPvs,
        RenderFlag::SkipFrustumCulling,
        RenderFlag::Multisampling,
    ];

    fn bit(self) -> FlagBits {
        match self {
            RenderFlag::ShowStats => FlagBits::SHOW_STATS,
            RenderFlag::Wireframe => FlagBits::WIREFRAME,
            RenderFlag::ShowLightmaps => FlagBits::SHOW_LIGHTMAPS,
            RenderFlag::UseLightmaps => FlagBits::USE_LIGHTMAPS,
            RenderFlag::AlphaTest => FlagBits::ALPHA_TEST,
            RenderFlag::SkipMissingTex => FlagBits::SKIP_MISSING_TEX,
            RenderFlag::SkipPvs => FlagBits::SKIP_PVS,
            RenderFlag::SkipFrustumCulling => FlagBits::SKIP_FRUSTUM_CULLING,
            RenderFlag::Multisampling => FlagBits::MULTISAMPLING,
        }
    }

    /// Short label for legends.
    pub fn label(self) -> &'static str {
        match self {
            RenderFlag::ShowStats => "stats",
            RenderFlag::Wireframe => "wireframe",
            RenderFlag::ShowLightmaps => "show lightmaps",
            RenderFlag::UseLightmaps => "use lightmaps",
            RenderFlag::AlphaTest => "alpha test",
            RenderFlag::SkipMissingTex => "skip missing textures",
            RenderFlag::SkipPvs => "skip PVS",
            RenderFlag::SkipFrustumCulling => "skip frustum culling",
            RenderFlag::Multisampling => "multisampling",
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct FlagBits: u16 {
        const SHOW_STATS = 1 << 0;
        const WIREFRAME = 1 << 1;
        const SHOW_LIGHTMAPS = 1 << 2;
        const USE_LIGHTMAPS = 1 << 3;
        const ALPHA_TEST = 1 << 4;
        const SKIP_MISSING_TEX = 1 << 5;
        const SKIP_PVS = 1 << 6;
        const SKIP_FRUSTUM_CULLING = 1 << 7;
        const MULTISAMPLING = 1 << 8;
    }
}

/// Set of active render toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderFlags(FlagBits);

impl RenderFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, flag: RenderFlag) -> bool {
        self.0.contains(flag.bit())
    }

    pub fn set(&mut self, flag: RenderFlag, on: bool) {
        self.0.set(flag.bit(), on);
    }

    /// Flip `flag`, returning its new state.
    pub fn toggle(&mut self, flag: RenderFlag) -> bool {
        self.0.toggle(flag.bit());
        self.has(flag)
    }

    pub fn active(&self) -> impl Iterator<Item = RenderFlag> + '_ {
        RenderFlag::ALL.into_iter().filter(|f| self.has(*f))
    }

    pub fn show_stats(&self) -> bool {
        self.has(RenderFlag::ShowStats)
    }

    pub fn wireframe(&self) -> bool {
        self.has(RenderFlag::Wireframe)
    }

    pub fn show_lightmaps(&self) -> bool {
        self.has(RenderFlag::ShowLightmaps)
    }

    pub fn use_lightmaps(&self) -> bool {
        self.has(RenderFlag::UseLightmaps)
    }

    pub fn alpha_test(&self) -> bool {
        self.has(RenderFlag::AlphaTest)
    }

    pub fn skip_missing_tex(&self) -> bool {
        self.has(RenderFlag::SkipMissingTex)
    }

    pub fn skip_pvs(&self) -> bool {
        self.has(RenderFlag::SkipPvs)
    }

    pub fn skip_frustum_culling(&self) -> bool {
        self.has(RenderFlag::SkipFrustumCulling)
    }

    pub fn multisampling(&self) -> bool {
        self.has(RenderFlag::Multisampling)
    }
}

/// Read-only counts from the loaded map, as shown on the HUD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapStats {
    pub vertices: u32,
    pub faces: u32,
    pub patches: u32,
    pub visible_faces: u32,
    pub visible_patches: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_start_cleared() {
        let flags = RenderFlags::new();
        assert!(RenderFlag::ALL.iter().all(|f| !flags.has(*f)));
        assert_eq!(flags.active().count(), 0);
    }

    #[test]
    fn test_toggle_is_independent_per_flag() {
        let mut flags = RenderFlags::new();
        assert!(flags.toggle(RenderFlag::Wireframe));
        assert!(flags.toggle(RenderFlag::SkipPvs));
        assert!(flags.wireframe());
        assert!(flags.skip_pvs());
        assert!(!flags.alpha_test());

        assert!(!flags.toggle(RenderFlag::Wireframe));
        assert!(!flags.wireframe());
        assert!(flags.skip_pvs());
    }

    #[test]
    fn test_set_and_active_listing() {
        let mut flags = RenderFlags::new();
        flags.set(RenderFlag::Multisampling, true);
        flags.set(RenderFlag::UseLightmaps, true);
        flags.set(RenderFlag::UseLightmaps, true);
        let active: Vec<_> = flags.active().collect();
        assert_eq!(active, vec![RenderFlag::UseLightmaps, RenderFlag::Multisampling]);
        flags.set(RenderFlag::Multisampling, false);
        assert!(!flags.multisampling());
    }
}
