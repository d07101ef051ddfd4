//! Table-driven finite state machine.
//!
//! Each state carries an optional entry action, a mandatory do-action and an
//! optional exit action. The do-action returns the verb that drives the next
//! transition (`None` keeps the machine where it is); the exit action sees
//! that verb first and may rewrite it before the `(state, verb)` lookup.
//!
//! Tables are validated once by [`TableBuilder::build`]. A verb that has no
//! transition in the current state at runtime is a programming error and
//! panics.
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Entry action, run every time the state is entered (self-loops included).
pub type EntryFn<C> = fn(&mut C);
/// Do-action, run once per cycle while the state is current.
pub type DoFn<C, V> = fn(&mut C) -> Option<V>;
/// Exit action, may rewrite the verb produced by the do-action.
pub type ExitFn<C, V> = fn(V, &mut C) -> V;

/// Error raised when a transition table is inconsistent.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TableError {
    #[error("state {0} is defined twice")]
    DuplicateState(String),
    #[error("state {state} maps verb {verb} twice")]
    DuplicateTransition { state: String, verb: String },
    #[error("state {state} transitions to undefined state {target}")]
    UndefinedTarget { state: String, target: String },
    #[error("initial state {0} is not defined")]
    UndefinedInitial(String),
}

/// Actions attached to one state.
pub struct Behavior<C, V> {
    entry: Option<EntryFn<C>>,
    on_state: DoFn<C, V>,
    exit: Option<ExitFn<C, V>>,
}

impl<C, V> Behavior<C, V> {
    pub fn new(on_state: DoFn<C, V>) -> Self {
        Self {
            entry: None,
            on_state,
            exit: None,
        }
    }

    pub fn entry(mut self, entry: EntryFn<C>) -> Self {
        self.entry = Some(entry);
        self
    }

    pub fn exit(mut self, exit: ExitFn<C, V>) -> Self {
        self.exit = Some(exit);
        self
    }
}

struct StateDef<S, V, C> {
    behavior: Behavior<C, V>,
    transitions: HashMap<V, S>,
}

/// Collects state definitions and validates them into a [`StateMachine`].
pub struct TableBuilder<S, V, C> {
    initial: S,
    states: Vec<(S, Behavior<C, V>, Vec<(V, S)>)>,
}

impl<S, V, C> TableBuilder<S, V, C>
where
    S: Copy + Eq + Hash + Debug,
    V: Copy + Eq + Hash + Debug,
{
    pub fn new(initial: S) -> Self {
        Self {
            initial,
            states: Vec::new(),
        }
    }

    pub fn state(mut self, state: S, behavior: Behavior<C, V>, transitions: &[(V, S)]) -> Self {
        self.states.push((state, behavior, transitions.to_vec()));
        self
    }

    pub fn build(self) -> Result<StateMachine<S, V, C>, TableError> {
        let mut states: HashMap<S, StateDef<S, V, C>> = HashMap::with_capacity(self.states.len());
        for (state, behavior, transitions) in self.states {
            let mut map = HashMap::with_capacity(transitions.len());
            for (verb, target) in transitions {
                if map.insert(verb, target).is_some() {
                    return Err(TableError::DuplicateTransition {
                        state: format!("{state:?}"),
                        verb: format!("{verb:?}"),
                    });
                }
            }
            let def = StateDef {
                behavior,
                transitions: map,
            };
            if states.insert(state, def).is_some() {
                return Err(TableError::DuplicateState(format!("{state:?}")));
            }
        }
        for (state, def) in &states {
            for target in def.transitions.values() {
                if !states.contains_key(target) {
                    return Err(TableError::UndefinedTarget {
                        state: format!("{state:?}"),
                        target: format!("{target:?}"),
                    });
                }
            }
        }
        if !states.contains_key(&self.initial) {
            return Err(TableError::UndefinedInitial(format!("{:?}", self.initial)));
        }
        Ok(StateMachine {
            states,
            current: self.initial,
            pending: None,
            started: false,
        })
    }
}

/// A state change performed during [`StateMachine::cycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S, V> {
    pub from: S,
    pub verb: V,
    pub to: S,
}

/// Validated state machine over states `S`, verbs `V` and context `C`.
pub struct StateMachine<S, V, C> {
    states: HashMap<S, StateDef<S, V, C>>,
    current: S,
    pending: Option<V>,
    started: bool,
}

impl<S, V, C> StateMachine<S, V, C>
where
    S: Copy + Eq + Hash + Debug,
    V: Copy + Eq + Hash + Debug,
{
    pub fn current(&self) -> S {
        self.current
    }

    /// Runs one cycle: apply the pending verb (exit, lookup, entry) and then
    /// the do-action of the resulting state.
    ///
    /// # Panics
    /// When the pending verb has no transition from the current state.
    pub fn cycle(&mut self, ctx: &mut C) -> Option<Transition<S, V>> {
        let mut transition = None;
        if !self.started {
            self.started = true;
            if let Some(entry) = self.def(self.current).behavior.entry {
                entry(ctx);
            }
        } else if let Some(verb) = self.pending.take() {
            let from = self.current;
            let def = self.def(from);
            let verb = match def.behavior.exit {
                Some(exit) => exit(verb, ctx),
                None => verb,
            };
            let to = match self.def(from).transitions.get(&verb) {
                Some(to) => *to,
                None => panic!("no transition for verb {verb:?} in state {from:?}"),
            };
            self.current = to;
            if let Some(entry) = self.def(to).behavior.entry {
                entry(ctx);
            }
            transition = Some(Transition { from, verb, to });
        }
        let on_state = self.def(self.current).behavior.on_state;
        self.pending = on_state(ctx);
        transition
    }

    fn def(&self, state: S) -> &StateDef<S, V, C> {
        // build() guarantees every reachable state is defined
        match self.states.get(&state) {
            Some(def) => def,
            None => panic!("state {state:?} is not defined"),
        }
    }
}
