//! Image layout bookkeeping.
//!
//! Every image carries a [`LayoutState`]. Moving it to another layout goes through a fixed
//! table that yields the access masks and pipeline stages of the barrier. The table only
//! covers the transitions this crate performs; anything else is a fatal error.

use ash::vk;

/// Accesses and stages on one side of a barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessScope {
    pub access: vk::AccessFlags,
    pub stage: vk::PipelineStageFlags,
}

impl AccessScope {
    const fn new(access: vk::AccessFlags, stage: vk::PipelineStageFlags) -> Self {
        Self { access, stage }
    }
}

/// Layouts an image can be in before a tracked transition
pub const SOURCE_LAYOUTS: [vk::ImageLayout; 6] = [
    vk::ImageLayout::UNDEFINED,
    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    vk::ImageLayout::GENERAL,
    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
];

/// Layouts a tracked transition can end in
pub const DESTINATION_LAYOUTS: [vk::ImageLayout; 6] = [
    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    vk::ImageLayout::GENERAL,
    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
];

fn source_scope(old: vk::ImageLayout) -> Option<AccessScope> {
    let scope = match old {
        vk::ImageLayout::UNDEFINED => AccessScope::new(
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TOP_OF_PIPE,
        ),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => AccessScope::new(
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => AccessScope::new(
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => AccessScope::new(
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::GENERAL => AccessScope::new(
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => AccessScope::new(
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER,
        ),
        _ => return None,
    };
    Some(scope)
}

fn destination_scope(new: vk::ImageLayout) -> Option<AccessScope> {
    let scope = match new {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => AccessScope::new(
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => AccessScope::new(
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => AccessScope::new(
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => AccessScope::new(
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ),
        vk::ImageLayout::GENERAL => AccessScope::new(
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => AccessScope::new(
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER,
        ),
        _ => return None,
    };
    Some(scope)
}

/// Barrier parameters for moving an image from one layout to another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src: AccessScope,
    pub dst: AccessScope,
}

impl LayoutTransition {
    /// `None` when the pair is not in the table
    pub fn lookup(old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Option<Self> {
        Some(Self {
            old_layout,
            new_layout,
            src: source_scope(old_layout)?,
            dst: destination_scope(new_layout)?,
        })
    }

    /// Aborts on a pair outside the table
    pub fn between(old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        match Self::lookup(old_layout, new_layout) {
            Some(transition) => transition,
            None => {
                log::error!("Unsupported layout transition {:?} -> {:?}", old_layout, new_layout);
                panic!("Unsupported layout transition {:?} -> {:?}", old_layout, new_layout);
            }
        }
    }

    pub fn barrier(
        &self,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
    ) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier::default()
            .old_layout(self.old_layout)
            .new_layout(self.new_layout)
            .src_access_mask(self.src.access)
            .dst_access_mask(self.dst.access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(range)
    }

    pub fn record(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        barriers: &[vk::ImageMemoryBarrier],
    ) {
        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                self.src.stage,
                self.dst.stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                barriers,
            );
        }
    }
}

/// The layout an image is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutState {
    current: vk::ImageLayout,
}

impl LayoutState {
    pub fn new(initial: vk::ImageLayout) -> Self {
        Self { current: initial }
    }

    pub fn current(&self) -> vk::ImageLayout {
        self.current
    }

    /// Barrier needed to reach `new`, `None` when the image is already there
    pub fn plan(&self, new: vk::ImageLayout) -> Option<LayoutTransition> {
        (new != self.current).then(|| LayoutTransition::between(self.current, new))
    }

    pub fn can_transition_to(&self, new: vk::ImageLayout) -> bool {
        new == self.current || LayoutTransition::lookup(self.current, new).is_some()
    }

    /// Layouts reachable from the current one with a single tracked transition
    pub fn next_layouts(&self) -> impl Iterator<Item = vk::ImageLayout> + '_ {
        DESTINATION_LAYOUTS
            .into_iter()
            .filter(|layout| *layout != self.current && self.can_transition_to(*layout))
    }

    pub(crate) fn commit(&mut self, new: vk::ImageLayout) {
        self.current = new;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_transition_masks() {
        let t = LayoutTransition::between(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert_eq!(t.src.access, vk::AccessFlags::empty());
        assert_eq!(t.src.stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(t.dst.access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(t.dst.stage, vk::PipelineStageFlags::TRANSFER);

        let t = LayoutTransition::between(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(t.src.access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(t.dst.access, vk::AccessFlags::SHADER_READ);
        assert!(t.dst.stage.contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
    }

    #[test]
    fn test_attachment_transitions() {
        let depth = LayoutTransition::between(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        );
        assert_eq!(depth.dst.stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);
        assert!(depth.dst.access.contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));

        let readback = LayoutTransition::between(
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        assert_eq!(readback.src.stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(readback.dst.access, vk::AccessFlags::TRANSFER_READ);

        assert!(LayoutTransition::lookup(
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        )
            .is_some());
    }

    #[test]
    fn test_general_round_trips() {
        for other in [
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ] {
            assert!(LayoutTransition::lookup(vk::ImageLayout::GENERAL, other).is_some());
            assert!(LayoutTransition::lookup(other, vk::ImageLayout::GENERAL).is_some());
        }
    }

    #[test]
    fn test_unmapped_pairs_are_reported() {
        assert!(LayoutTransition::lookup(
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
            .is_none());
        assert!(LayoutTransition::lookup(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::UNDEFINED,
        )
            .is_none());
    }

    #[test]
    #[should_panic(expected = "Unsupported layout transition")]
    fn test_unmapped_pair_is_fatal() {
        LayoutTransition::between(
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::GENERAL,
        );
    }

    #[test]
    fn test_state_tracks_last_transition() {
        let mut state = LayoutState::new(vk::ImageLayout::UNDEFINED);
        let plan = state.plan(vk::ImageLayout::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(plan.old_layout, vk::ImageLayout::UNDEFINED);
        state.commit(plan.new_layout);
        assert_eq!(state.current(), vk::ImageLayout::TRANSFER_DST_OPTIMAL);

        // Same to same records nothing
        assert!(state.plan(vk::ImageLayout::TRANSFER_DST_OPTIMAL).is_none());
        assert_eq!(state.current(), vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    }

    #[test]
    fn test_next_layouts_exclude_current() {
        let state = LayoutState::new(vk::ImageLayout::GENERAL);
        let next = state.next_layouts().collect::<Vec<_>>();
        assert!(!next.contains(&vk::ImageLayout::GENERAL));
        assert!(next.contains(&vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));

        let presented = LayoutState::new(vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(presented.next_layouts().count(), 0);
        assert!(presented.can_transition_to(vk::ImageLayout::PRESENT_SRC_KHR));
    }

    #[test]
    fn test_every_source_reaches_every_destination() {
        for old in SOURCE_LAYOUTS {
            for new in DESTINATION_LAYOUTS {
                assert!(LayoutTransition::lookup(old, new).is_some(), "{:?} -> {:?}", old, new);
            }
        }
    }
}
