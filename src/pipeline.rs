use std::marker::PhantomData;
use std::sync::Arc;

use crate::engine::{Inputs, JoinNode, Key, Port, SourceNode, StageNode, run_parallel};
use crate::error::Error;
use crate::graph::Graph;
use crate::store::ResultStore;

/// A typed dataflow pipeline.
///
/// A `Pipeline` is built incrementally: stages are added one at a time,
/// each wired to previously-registered stages through their [`Port`]s.
/// Requesting the evaluation of a port with [`run`](Pipeline::run) executes
/// exactly the stages the target transitively depends on, in dependency
/// order, on a bounded pool of worker threads.
///
/// # Example
///
/// ```rust
/// use nagare::Pipeline;
///
/// let mut pipeline = Pipeline::new();
///
/// let src = pipeline.add_source("src", || Ok(5))?;
/// let incr = pipeline.add_stage("incr", |x: &i32| Ok(x + 1), src.clone())?;
///
/// assert_eq!(pipeline.run_single(&incr)?, 6);
/// # Ok::<(), nagare::Error>(())
/// ```
pub struct Pipeline {
    graph: Graph,
    store: ResultStore,
}

impl Pipeline {
    /// Creates a new, empty pipeline.
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
            store: ResultStore::new(),
        }
    }

    /// Registers a stage with no inputs.
    ///
    /// Fails with [`Error::StageAlreadyExists`] if `key` is taken. On
    /// success returns the typed port of the new stage.
    pub fn add_source<F, T>(&mut self, key: impl AsRef<str>, func: F) -> Result<Port<T>, Error>
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        let key: Key = Arc::from(key.as_ref());

        self.graph.insert(Arc::new(SourceNode {
            key: key.clone(),
            func,
            _phantom: PhantomData,
        }))?;

        tracing::debug!(stage = %key, "registered source");
        Ok(Port::new(key))
    }

    /// Registers a stage computed from one or more upstream ports.
    ///
    /// `inputs` is a single `Port<T>` for a unary stage, or a tuple of
    /// ports for an n-ary one; the computation receives references to the
    /// upstream values, position by position.
    ///
    /// Fails with [`Error::StageAlreadyExists`] if `key` is taken, or with
    /// [`Error::UnknownStage`] if any supplied port refers to a stage this
    /// pipeline does not know. A failed call leaves the pipeline
    /// unmodified.
    pub fn add_stage<F, I, T>(
        &mut self,
        key: impl AsRef<str>,
        func: F,
        inputs: I,
    ) -> Result<Port<T>, Error>
    where
        I: Inputs,
        F: for<'a> Fn(I::Output<'a>) -> anyhow::Result<T> + Send + Sync + 'static,
        T: Send + Sync + 'static,
    {
        let key: Key = Arc::from(key.as_ref());

        self.graph.insert(Arc::new(StageNode {
            key: key.clone(),
            inputs,
            func,
            _phantom: PhantomData,
        }))?;

        tracing::debug!(stage = %key, "registered stage");
        Ok(Port::new(key))
    }

    /// Registers the built-in pairing stage: it loads the two upstream
    /// values and produces the tuple, with no user computation.
    pub fn join<A, B>(
        &mut self,
        key: impl AsRef<str>,
        left: &Port<A>,
        right: &Port<B>,
    ) -> Result<Port<(A, B)>, Error>
    where
        A: Clone + Send + Sync + 'static,
        B: Clone + Send + Sync + 'static,
    {
        let key: Key = Arc::from(key.as_ref());

        self.graph.insert(Arc::new(JoinNode::<A, B> {
            key: key.clone(),
            left: left.key.clone(),
            right: right.key.clone(),
            _phantom: PhantomData,
        }))?;

        tracing::debug!(stage = %key, "registered join");
        Ok(Port::new(key))
    }

    /// Evaluates `port` on `workers` threads and returns its typed value.
    ///
    /// Exactly the stages in the target's upstream closure run, each at
    /// most once; intermediate results are memoized for the duration of
    /// the run and dropped at the start of the next one.
    ///
    /// `workers` must be at least 1 and no greater than the hardware
    /// parallelism reported by the host (when it can be queried);
    /// otherwise the run fails with [`Error::InvalidThreadCount`].
    pub fn run<T>(&self, port: &Port<T>, workers: usize) -> Result<T, Error>
    where
        T: Clone + Send + Sync + 'static,
    {
        run_parallel(&self.graph, &self.store, port, workers)
    }

    /// Evaluates `port` on a single worker thread.
    pub fn run_single<T>(&self, port: &Port<T>) -> Result<T, Error>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.run(port, 1)
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &ResultStore {
        &self.store
    }

    #[cfg(test)]
    pub(crate) fn graph(&self) -> &Graph {
        &self.graph
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders the pipeline as a Mermaid `graph LR` diagram, with the
/// producer's output type on each edge.
impl std::fmt::Display for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        let mut keys: Vec<_> = self.graph.keys().collect();
        keys.sort();

        for key in &keys {
            let name = key.replace('"', "\\\"");
            writeln!(f, "    {key}[\"{name}\"]")?;
        }

        for key in &keys {
            for consumer in self.graph.downstream_of(key) {
                // The registry and adjacency maps share one key set.
                let producer = self.graph.stage(key).unwrap();
                let type_name = producer
                    .output_type_name()
                    .replace('<', "&lt;")
                    .replace('>', "&gt;");
                writeln!(f, "    {key} -- \"{type_name}\" --> {consumer}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The diamond from the scheduler's perspective:
    ///
    ///        src
    ///       /    \
    ///    incr    triple
    ///       \    /
    ///        pair
    ///         |
    ///        sum
    fn diamond(pipeline: &mut Pipeline) -> Port<i32> {
        let src = pipeline.add_source("src", || Ok(5)).unwrap();
        let incr = pipeline
            .add_stage("incr", |x: &i32| Ok(x + 1), src.clone())
            .unwrap();
        let triple = pipeline
            .add_stage("triple", |x: &i32| Ok(x * 3), src.clone())
            .unwrap();
        let pair = pipeline.join("pair", &incr, &triple).unwrap();
        pipeline
            .add_stage("sum", |pair: &(i32, i32)| Ok(pair.0 + pair.1), pair)
            .unwrap()
    }

    #[test]
    fn test_single_source() {
        let mut pipeline = Pipeline::new();
        let src = pipeline.add_source("src", || Ok(5)).unwrap();

        assert_eq!(pipeline.run(&src, 1).unwrap(), 5);
    }

    #[test]
    fn test_linear_chain() {
        let mut pipeline = Pipeline::new();

        let src = pipeline.add_source("src", || Ok(5)).unwrap();
        let incr = pipeline
            .add_stage("incr", |x: &i32| Ok(x + 1), src)
            .unwrap();
        let triple = pipeline
            .add_stage("triple", |x: &i32| Ok(x * 3), incr)
            .unwrap();

        assert_eq!(pipeline.run_single(&triple).unwrap(), 18);
    }

    #[test]
    fn test_diamond_via_join() {
        let mut pipeline = Pipeline::new();
        let sum = diamond(&mut pipeline);

        assert_eq!(pipeline.run_single(&sum).unwrap(), 21);
    }

    #[test]
    fn test_partial_subgraph() {
        let mut pipeline = Pipeline::new();
        let _ = diamond(&mut pipeline);
        let incr = Port::<i32>::new(Arc::from("incr"));
        pipeline.add_source("other", || Ok(0)).unwrap();

        assert_eq!(pipeline.run_single(&incr).unwrap(), 6);

        // Only the closure of `incr` ran; the store holds exactly its
        // members and nothing else was touched.
        let store = pipeline.store();
        assert!(store.contains("src"));
        assert!(store.contains("incr"));
        for key in ["triple", "pair", "sum", "other"] {
            assert!(!store.contains(key), "unexpected entry for '{key}'");
        }
    }

    #[test]
    fn test_duplicate_key_leaves_pipeline_intact() {
        let mut pipeline = Pipeline::new();
        let src = pipeline.add_source("src", || Ok(5)).unwrap();

        let error = pipeline.add_source("src", || Ok(9)).unwrap_err();
        assert_eq!(error.name(), "StageAlreadyExists");

        assert_eq!(pipeline.graph().len(), 1);
        assert_eq!(pipeline.run_single(&src).unwrap(), 5);
    }

    #[test]
    fn test_port_from_another_pipeline_rejected() {
        let mut donor = Pipeline::new();
        let foreign = donor.add_source("foreign", || Ok(1)).unwrap();

        let mut pipeline = Pipeline::new();
        let error = pipeline
            .add_stage("sink", |x: &i32| Ok(*x), foreign)
            .unwrap_err();

        assert_eq!(error.name(), "UnknownStage");
        assert_eq!(pipeline.graph().len(), 0);
    }

    #[test]
    fn test_failing_stage() {
        let mut pipeline = Pipeline::new();

        let src = pipeline.add_source("src", || Ok(5)).unwrap();
        let bad = pipeline
            .add_stage(
                "bad",
                |_: &i32| -> anyhow::Result<i32> { anyhow::bail!("corrupt input") },
                src,
            )
            .unwrap();
        let sink = pipeline
            .add_stage("sink", |x: &i32| Ok(x + 1), bad)
            .unwrap();

        let four = std::thread::available_parallelism()
            .map(|n| n.get().min(4))
            .unwrap_or(1);
        for workers in [1, four] {
            let error = pipeline.run(&sink, workers).unwrap_err();
            assert_eq!(error.name(), "RuntimeError");
            assert!(!pipeline.store().contains("sink"));
        }
    }

    #[test]
    fn test_type_mismatch_at_final_fetch() {
        let mut pipeline = Pipeline::new();
        pipeline.add_source("src", || Ok(5)).unwrap();

        // A port forged with the wrong output type: the stored value is an
        // i32, the fetch reifies to String.
        let forged = Port::<String>::new(Arc::from("src"));
        let error = pipeline.run_single(&forged).unwrap_err();

        assert_eq!(error.name(), "TypeMismatch");
    }

    #[test]
    fn test_variadic_stage() {
        let mut pipeline = Pipeline::new();

        let a = pipeline.add_source("a", || Ok(1)).unwrap();
        let b = pipeline.add_source("b", || Ok(2)).unwrap();
        let c = pipeline.add_source("c", || Ok(3)).unwrap();
        let sum = pipeline
            .add_stage(
                "sum",
                |(a, b, c): (&i32, &i32, &i32)| Ok(a + b + c),
                (a, b, c),
            )
            .unwrap();

        assert_eq!(pipeline.run_single(&sum).unwrap(), 6);
    }

    #[test]
    fn test_join_same_upstream_twice() {
        let mut pipeline = Pipeline::new();

        let src = pipeline.add_source("src", || Ok(5)).unwrap();
        let pair = pipeline.join("pair", &src, &src).unwrap();

        assert_eq!(pipeline.run_single(&pair).unwrap(), (5, 5));
    }

    #[test]
    fn test_mixed_types() {
        let mut pipeline = Pipeline::new();

        let src = pipeline.add_source("src", || Ok(5i32)).unwrap();
        let text = pipeline
            .add_stage("text", |x: &i32| Ok(format!("value {x}")), src.clone())
            .unwrap();
        let pair = pipeline.join("pair", &src, &text).unwrap();
        let render = pipeline
            .add_stage(
                "render",
                |pair: &(i32, String)| Ok(format!("{}: {}", pair.0, pair.1)),
                pair,
            )
            .unwrap();

        assert_eq!(pipeline.run_single(&render).unwrap(), "5: value 5");
    }

    #[test]
    fn test_reuse_across_runs() {
        let mut pipeline = Pipeline::new();
        let sum = diamond(&mut pipeline);

        assert_eq!(pipeline.run_single(&sum).unwrap(), 21);
        assert_eq!(pipeline.run_single(&sum).unwrap(), 21);
    }

    #[test]
    fn test_mermaid_display() {
        let mut pipeline = Pipeline::new();
        let _ = diamond(&mut pipeline);

        let rendered = pipeline.to_string();
        assert!(rendered.starts_with("graph LR"));
        assert!(rendered.contains("src[\"src\"]"));
        assert!(rendered.contains("src -- \"i32\" --> incr"));
        assert!(rendered.contains("pair -- \"(i32, i32)\" --> sum"));
    }
}
