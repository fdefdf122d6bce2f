//! Peephole fusion of adjacent translated instructions.

use crate::{
    Arch,
    arch::Pattern,
    cache::TranslationCache,
    ic::{Handler, SlotRef},
    page::PageId,
};

/// Tries every fusion rule of `A` on the slots ending at `slot`, which has
/// just been translated. On a match, the first slot of the window is
/// overwritten with the fused call and the page is marked as combined.
///
/// Returns the name of the rule that matched.
pub fn try_combine<A: Arch>(
    cache: &mut TranslationCache<A::Op>,
    patterns: &[Pattern<A>],
    slot: SlotRef,
) -> Option<&'static str> {
    for pattern in patterns {
        let len = pattern.len as u32;
        if len == 0 || slot.slot + 1 < len {
            continue;
        }

        let first = slot.offset(1 - len as i32);
        let window = &cache.slots(slot.page)[first.slot as usize..=slot.slot as usize];
        if !window.iter().all(|ic| matches!(ic.handler, Handler::Op(_))) {
            continue;
        }

        if let Some(fused) = (pattern.fuse)(window, first) {
            tracing::trace!(pattern = pattern.name, slot = first.slot, "combined instructions");

            cache.set(first, fused);
            cache.header_mut(slot.page).flags.set_combined(true);
            return Some(pattern.name);
        }
    }

    None
}

/// Undoes every translation of a combined page so it can be stepped through
/// one instruction at a time. Returns whether the page was combined.
pub fn revert<O: Copy>(cache: &mut TranslationCache<O>, page: PageId) -> bool {
    if !cache.header(page).flags.combined() {
        return false;
    }

    cache.reset_page(page);
    true
}
