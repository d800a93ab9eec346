//! Scope chain
//!
//! Environments live in a per-request arena and refer to their parent by
//! id. A lookup that misses locally falls through to the parent; writes
//! always land in one specific environment. The parent link is fixed when the
//! environment is allocated.
//!
//! Slots are reference counted: the frame that allocated an environment
//! holds one reference, each child holds one on its parent, and a forked
//! thread holds one per inherited frame. A slot whose count drops to zero is
//! freed and reused under a new generation, so a stale [`ScopeId`] never
//! reaches the environment that replaced it.

use serde_json::{Map, Value as JsonValue};
use tracing::warn;

use super::expressions::VarLookup;
use super::properties::Properties;

/// Handle to an environment inside a [`ScopeArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId {
    index: usize,
    generation: u32,
}

impl ScopeId {
    pub fn index(self) -> usize {
        self.index
    }
}

/// One environment: ordered variables plus an optional parent.
#[derive(Debug, Default, Clone)]
pub struct Environment {
    vars: Map<String, JsonValue>,
    parent: Option<ScopeId>,
}

impl Environment {
    pub fn vars(&self) -> &Map<String, JsonValue> {
        &self.vars
    }

    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }
}

#[derive(Debug, Default)]
struct Slot {
    env: Option<Environment>,
    generation: u32,
    refs: usize,
}

#[derive(Debug, Default)]
pub struct ScopeArena {
    slots: Vec<Slot>,
    free: Vec<usize>,
    live: usize,
}

impl ScopeArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new environment holding one reference, owned by the caller.
    pub fn alloc(&mut self, parent: Option<ScopeId>, vars: Map<String, JsonValue>) -> ScopeId {
        if let Some(parent) = parent {
            self.retain(parent);
        }
        let env = Some(Environment { vars, parent });
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.env = env;
                slot.refs = 1;
                ScopeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    env,
                    generation: 0,
                    refs: 1,
                });
                ScopeId {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        }
    }

    /// Take another reference on `id`.
    pub fn retain(&mut self, id: ScopeId) {
        match self.slot_mut(id) {
            Some(slot) => slot.refs += 1,
            None => warn!(scope = id.index, "Retain of a released scope"),
        }
    }

    /// Drop one reference on `id`, freeing it (and then its parent chain)
    /// once nothing refers to it.
    pub fn release(&mut self, id: ScopeId) {
        let mut next = Some(id);
        while let Some(id) = next.take() {
            let Some(slot) = self.slot_mut(id) else {
                warn!(scope = id.index, "Release of a released scope");
                return;
            };
            slot.refs -= 1;
            if slot.refs > 0 {
                return;
            }
            let env = slot.env.take();
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.index);
            self.live -= 1;
            next = env.and_then(|env| env.parent);
        }
    }

    /// Number of live environments.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots ever allocated, live or free.
    pub fn slots(&self) -> usize {
        self.slots.len()
    }

    fn slot_mut(&mut self, id: ScopeId) -> Option<&mut Slot> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation && slot.env.is_some())
    }

    /// The environment behind `id`, or `None` once it has been released.
    pub fn env(&self, id: ScopeId) -> Option<&Environment> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.env.as_ref())
    }

    fn env_mut(&mut self, id: ScopeId) -> Option<&mut Environment> {
        self.slot_mut(id).and_then(|slot| slot.env.as_mut())
    }

    pub fn parent(&self, id: ScopeId) -> Option<ScopeId> {
        self.env(id).and_then(|env| env.parent)
    }

    /// Walk `levels` parent links up from `id`.
    pub fn ancestor(&self, id: ScopeId, levels: usize) -> Option<ScopeId> {
        let mut current = id;
        for _ in 0..levels {
            current = self.parent(current)?;
        }
        Some(current)
    }

    /// Chain lookup: local first, then each parent in turn.
    pub fn get(&self, id: ScopeId, name: &str) -> Option<JsonValue> {
        let mut current = Some(id);
        while let Some(scope) = current {
            let env = self.env(scope)?;
            if let Some(v) = env.vars.get(name) {
                return Some(v.clone());
            }
            current = env.parent;
        }
        None
    }

    /// Lookup restricted to a single environment.
    pub fn get_local(&self, id: ScopeId, name: &str) -> Option<JsonValue> {
        self.env(id).and_then(|env| env.vars.get(name).cloned())
    }

    pub fn set(&mut self, id: ScopeId, name: impl Into<String>, value: JsonValue) {
        match self.env_mut(id) {
            Some(env) => {
                env.vars.insert(name.into(), value);
            }
            None => warn!(scope = id.index, "Write to a released scope dropped"),
        }
    }

    pub fn remove(&mut self, id: ScopeId, name: &str) -> Option<JsonValue> {
        self.env_mut(id).and_then(|env| env.vars.shift_remove(name))
    }

    /// A lookup view over the chain starting at `id`, ending in `fallback`.
    pub fn view<'a>(&'a self, id: ScopeId, fallback: &'a Properties) -> ScopeView<'a> {
        ScopeView {
            arena: self,
            scope: id,
            fallback,
        }
    }
}

/// Read-only view of a scope chain for the expression evaluator.
pub struct ScopeView<'a> {
    arena: &'a ScopeArena,
    scope: ScopeId,
    fallback: &'a Properties,
}

impl VarLookup for ScopeView<'_> {
    fn lookup(&self, name: &str) -> Option<JsonValue> {
        self.arena
            .get(self.scope, name)
            .or_else(|| self.fallback.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn arena_with_chain() -> (ScopeArena, ScopeId, ScopeId, ScopeId) {
        let mut arena = ScopeArena::new();
        let root = arena.alloc(None, Map::new());
        let caller = arena.alloc(Some(root), Map::new());
        let callee = arena.alloc(Some(caller), Map::new());
        (arena, root, caller, callee)
    }

    #[test]
    fn test_lookup_falls_through_to_parents() {
        let (mut arena, root, caller, callee) = arena_with_chain();
        arena.set(root, "r", json!(1));
        arena.set(caller, "c", json!(2));

        assert_eq!(arena.get(callee, "r"), Some(json!(1)));
        assert_eq!(arena.get(callee, "c"), Some(json!(2)));
        assert_eq!(arena.get_local(callee, "c"), None);
    }

    #[test]
    fn test_writes_stay_local() {
        let (mut arena, _, caller, callee) = arena_with_chain();
        arena.set(caller, "x", json!("outer"));
        arena.set(callee, "x", json!("inner"));

        assert_eq!(arena.get(callee, "x"), Some(json!("inner")));
        assert_eq!(arena.get(caller, "x"), Some(json!("outer")));
    }

    #[test]
    fn test_ancestor_walk() {
        let (arena, root, caller, callee) = arena_with_chain();
        assert_eq!(arena.ancestor(callee, 0), Some(callee));
        assert_eq!(arena.ancestor(callee, 1), Some(caller));
        assert_eq!(arena.ancestor(callee, 2), Some(root));
        assert_eq!(arena.ancestor(callee, 3), None);
    }

    #[test]
    fn test_release_frees_chain_once_unreferenced() {
        let (mut arena, root, caller, callee) = arena_with_chain();
        assert_eq!(arena.len(), 3);

        // the caller's frame returns first; the callee still holds it
        arena.release(caller);
        assert_eq!(arena.len(), 3);
        assert_eq!(arena.get(callee, "missing"), None);
        assert!(arena.env(caller).is_some());

        arena.release(callee);
        assert_eq!(arena.len(), 1);
        assert!(arena.env(caller).is_none());
        assert!(arena.env(root).is_some());
    }

    #[test]
    fn test_reused_slot_does_not_alias_stale_id() {
        let mut arena = ScopeArena::new();
        let root = arena.alloc(None, Map::new());
        let first = arena.alloc(Some(root), Map::new());
        arena.set(first, "x", json!("old"));
        arena.release(first);

        let second = arena.alloc(Some(root), Map::new());
        arena.set(second, "x", json!("new"));

        assert_eq!(second.index(), first.index());
        assert_eq!(arena.slots(), 2);
        assert_eq!(arena.get(first, "x"), None);
        assert_eq!(arena.get(second, "x"), Some(json!("new")));

        // writes through the stale id are dropped
        arena.set(first, "x", json!("stale"));
        assert_eq!(arena.get(second, "x"), Some(json!("new")));
    }

    #[test]
    fn test_view_falls_back_to_properties() {
        let (arena, _, _, callee) = arena_with_chain();
        let props = Properties::from_pairs([("GLOBAL", "g")]);
        let view = arena.view(callee, &props);
        assert_eq!(view.lookup("GLOBAL"), Some(json!("g")));
        assert_eq!(view.lookup("nothing"), None);
    }
}
