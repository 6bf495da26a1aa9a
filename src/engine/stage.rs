use std::any::type_name;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::engine::{Inputs, Key, reify};
use crate::error::Error;
use crate::store::ResultStore;

/// The typed face of a stage: a unit of computation with a concrete output
/// type, which knows how to fetch and reify its own inputs from the result
/// store.
pub(crate) trait TypedStage: Send + Sync {
    type Output: Send + Sync + 'static;

    fn key(&self) -> &Key;

    /// Upstream keys in declaration order, multiplicity preserved.
    fn upstream(&self) -> Vec<Key>;

    fn run(&self, store: &ResultStore) -> Result<Self::Output, Error>;
}

/// The type-erased face of a stage, the form the graph registry holds.
///
/// Users only ever interact with the typed builder API; this trait is the
/// foundation that allows one registry to hold stages with different output
/// types.
pub(crate) trait Stage: Send + Sync {
    fn key(&self) -> &Key;

    fn upstream(&self) -> Vec<Key>;

    fn output_type_name(&self) -> &'static str;

    /// Fetches the inputs, runs the computation, and publishes the erased
    /// output into the store under this stage's key.
    fn execute(&self, store: &ResultStore) -> Result<(), Error>;
}

// A blanket implementation bridging the two. This is where the type
// erasure actually happens.
impl<S> Stage for S
where
    S: TypedStage,
{
    fn key(&self) -> &Key {
        S::key(self)
    }

    fn upstream(&self) -> Vec<Key> {
        S::upstream(self)
    }

    fn output_type_name(&self) -> &'static str {
        type_name::<S::Output>()
    }

    fn execute(&self, store: &ResultStore) -> Result<(), Error> {
        let output = S::run(self, store)?;
        store.publish(S::key(self).clone(), Arc::new(output));
        Ok(())
    }
}

/// A stage with no inputs, produced by
/// [`Pipeline::add_source`](crate::Pipeline::add_source).
pub(crate) struct SourceNode<F, T> {
    pub key: Key,
    pub func: F,
    pub _phantom: PhantomData<fn() -> T>,
}

impl<F, T> TypedStage for SourceNode<F, T>
where
    F: Fn() -> anyhow::Result<T> + Send + Sync,
    T: Send + Sync + 'static,
{
    type Output = T;

    fn key(&self) -> &Key {
        &self.key
    }

    fn upstream(&self) -> Vec<Key> {
        vec![]
    }

    fn run(&self, _: &ResultStore) -> Result<T, Error> {
        (self.func)().map_err(|source| Error::from_userland(self.key.clone(), source))
    }
}

/// A stage wired from one or more upstream ports, produced by
/// [`Pipeline::add_stage`](crate::Pipeline::add_stage).
pub(crate) struct StageNode<F, I, T> {
    pub key: Key,
    pub inputs: I,
    pub func: F,
    pub _phantom: PhantomData<fn() -> T>,
}

impl<F, I, T> TypedStage for StageNode<F, I, T>
where
    I: Inputs,
    F: for<'a> Fn(I::Output<'a>) -> anyhow::Result<T> + Send + Sync,
    T: Send + Sync + 'static,
{
    type Output = T;

    fn key(&self) -> &Key {
        &self.key
    }

    fn upstream(&self) -> Vec<Key> {
        self.inputs.keys()
    }

    fn run(&self, store: &ResultStore) -> Result<T, Error> {
        let values = store.raw_many(&self.inputs.keys())?;
        let resolved = self.inputs.resolve(&values)?;

        (self.func)(resolved).map_err(|source| Error::from_userland(self.key.clone(), source))
    }
}

/// The canonical built-in pairing stage, produced by
/// [`Pipeline::join`](crate::Pipeline::join). Loads both inputs and
/// publishes the tuple; there is no user computation.
pub(crate) struct JoinNode<A, B> {
    pub key: Key,
    pub left: Key,
    pub right: Key,
    pub _phantom: PhantomData<fn() -> (A, B)>,
}

impl<A, B> TypedStage for JoinNode<A, B>
where
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
{
    type Output = (A, B);

    fn key(&self) -> &Key {
        &self.key
    }

    fn upstream(&self) -> Vec<Key> {
        vec![self.left.clone(), self.right.clone()]
    }

    fn run(&self, store: &ResultStore) -> Result<(A, B), Error> {
        let values = store.raw_many(&[self.left.clone(), self.right.clone()])?;

        let left = reify::<A>(&self.left, &values[0])?;
        let right = reify::<B>(&self.right, &values[1])?;

        Ok((left.clone(), right.clone()))
    }
}
