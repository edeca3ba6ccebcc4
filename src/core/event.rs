//! Observer registration and disposal
//!
//! `Emitter` fans a value out to registered listeners. Each registration
//! returns a `Subscription`; dropping or disposing it removes the listener.
//! A `DisposableStore` collects subscriptions so an owner can release them
//! all at once.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

type Listener<T> = Box<dyn FnMut(&T)>;

struct Listeners<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
    /// Ids removed while a fire was in progress
    removed: Vec<u64>,
    firing: bool,
}

/// Something that releases a resource exactly once
pub trait Disposable {
    fn dispose(&mut self);
}

/// Event source with explicit listener registration
pub struct Emitter<T> {
    inner: Rc<RefCell<Listeners<T>>>,
}

impl<T: 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> Emitter<T> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Listeners {
                next_id: 1,
                entries: Vec::new(),
                removed: Vec::new(),
                firing: false,
            })),
        }
    }

    /// Register a listener
    #[must_use = "dropping the subscription removes the listener"]
    pub fn subscribe(&self, listener: impl FnMut(&T) + 'static) -> Subscription {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push((id, Box::new(listener)));

        let weak: Weak<RefCell<Listeners<T>>> = Rc::downgrade(&self.inner);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let mut inner = inner.borrow_mut();
                    if inner.firing {
                        inner.removed.push(id);
                    } else {
                        inner.entries.retain(|(entry, _)| *entry != id);
                    }
                }
            })),
        }
    }

    /// Deliver `value` to every listener registered before this call.
    ///
    /// Listeners may subscribe or unsubscribe while being called.
    pub fn fire(&self, value: &T) {
        let mut entries = {
            let mut inner = self.inner.borrow_mut();
            inner.firing = true;
            std::mem::take(&mut inner.entries)
        };

        for (id, listener) in entries.iter_mut() {
            let removed = self.inner.borrow().removed.contains(id);
            if !removed {
                listener(value);
            }
        }

        let mut inner = self.inner.borrow_mut();
        inner.firing = false;
        let removed = std::mem::take(&mut inner.removed);
        entries.retain(|(id, _)| !removed.contains(id));
        // Listeners added during the fire go after the existing ones
        let added = std::mem::take(&mut inner.entries);
        entries.extend(added.into_iter().filter(|(id, _)| !removed.contains(id)));
        inner.entries = entries;
    }

    pub fn listener_count(&self) -> usize {
        self.inner.borrow().entries.len()
    }
}

/// Handle returned by `Emitter::subscribe`
#[must_use = "dropping the subscription removes the listener"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce()>>,
}

impl Disposable for Subscription {
    fn dispose(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Owned collection of disposables, released together
#[derive(Default)]
pub struct DisposableStore {
    items: Vec<Box<dyn Disposable>>,
}

impl DisposableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, item: impl Disposable + 'static) {
        self.items.push(Box::new(item));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Dispose every held item once and empty the store
    pub fn dispose_all(&mut self) {
        for mut item in self.items.drain(..) {
            item.dispose();
        }
    }
}

impl Drop for DisposableStore {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

/// A named boolean shared between a session and whoever enables commands
/// from it (for example "terminal has focus")
#[derive(Debug, Clone, Default)]
pub struct ContextKey {
    value: Rc<Cell<bool>>,
}

impl ContextKey {
    pub fn new(initial: bool) -> Self {
        Self {
            value: Rc::new(Cell::new(initial)),
        }
    }

    pub fn get(&self) -> bool {
        self.value.get()
    }

    pub fn set(&self, value: bool) {
        self.value.set(value);
    }

    pub fn reset(&self) {
        self.value.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fire_reaches_subscribers() {
        let emitter = Emitter::<u32>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = seen.clone();
        let _sub = emitter.subscribe(move |v| sink.borrow_mut().push(*v));
        emitter.fire(&1);
        emitter.fire(&2);

        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_dispose_and_drop_unsubscribe() {
        let emitter = Emitter::<u32>::new();
        let count = Rc::new(Cell::new(0));

        let c = count.clone();
        let mut sub = emitter.subscribe(move |_| c.set(c.get() + 1));
        let c = count.clone();
        let dropped = emitter.subscribe(move |_| c.set(c.get() + 10));
        drop(dropped);

        emitter.fire(&0);
        assert_eq!(count.get(), 1);

        sub.dispose();
        sub.dispose();
        emitter.fire(&0);
        assert_eq!(count.get(), 1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_unsubscribe_during_fire() {
        let emitter = Rc::new(Emitter::<u32>::new());
        let count = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));

        let c = count.clone();
        let s = slot.clone();
        let sub = emitter.subscribe(move |_| {
            c.set(c.get() + 1);
            // Releasing our own subscription mid-fire must not panic
            s.borrow_mut().take();
        });
        *slot.borrow_mut() = Some(sub);

        emitter.fire(&0);
        emitter.fire(&0);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_store_disposes_once() {
        let emitter = Emitter::<()>::new();
        let mut store = DisposableStore::new();
        store.add(emitter.subscribe(|_| {}));
        store.add(emitter.subscribe(|_| {}));
        assert_eq!(emitter.listener_count(), 2);

        store.dispose_all();
        store.dispose_all();
        assert!(store.is_empty());
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_context_key_shared() {
        let key = ContextKey::default();
        let other = key.clone();
        key.set(true);
        assert!(other.get());
        other.reset();
        assert!(!key.get());
    }
}
