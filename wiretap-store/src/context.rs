use std::{
    backtrace::Backtrace,
    collections::hash_map::DefaultHasher,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
    thread::{self, ThreadId},
};

/// Thread that performed an observed call.
///
/// Only `id` takes part in equality and hashing; the name and group are
/// carried along for diagnostics. The group of a named thread is its name
/// without a trailing worker number, so `pool-3` and `pool-7` share `pool`.
#[derive(Debug, Clone)]
pub struct ThreadMeta {
    pub id: ThreadId,
    pub name: Option<Arc<str>>,
    pub group: Option<Arc<str>>,
}

impl ThreadMeta {
    pub fn current() -> Self {
        let thread = thread::current();

        Self {
            id: thread.id(),
            name: thread.name().map(Arc::from),
            group: thread.name().and_then(group_of).map(Arc::from),
        }
    }

    pub fn group<G: Into<Arc<str>>>(mut self, group: G) -> Self {
        self.group = Some(group.into());
        self
    }
}

fn group_of(name: &str) -> Option<&str> {
    let group = name
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .trim_end_matches(&['-', '_', '#', ' '][..]);

    (!group.is_empty()).then_some(group)
}

impl PartialEq for ThreadMeta {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ThreadMeta {}

impl Hash for ThreadMeta {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for ThreadMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({:?})", self.id),
            None => write!(f, "{:?}", self.id),
        }
    }
}

/// Formatted stack signature of the code that issued a call.
///
/// The hash is computed once at construction. Comparison checks the hash
/// before the text so that equal keys resolve without walking the frames
/// in the common case.
#[derive(Clone)]
pub struct CallSite {
    hash: u64,
    frames: Arc<str>,
}

impl CallSite {
    pub fn new<S: Into<Arc<str>>>(frames: S) -> Self {
        let frames = frames.into();
        let mut hasher = DefaultHasher::new();
        frames.hash(&mut hasher);

        Self {
            hash: hasher.finish(),
            frames,
        }
    }

    /// Stack of the caller, starting at the first frame outside wiretap and
    /// the backtrace machinery.
    pub fn capture() -> Self {
        Self::new(caller_frames(&Backtrace::force_capture().to_string()))
    }

    pub fn frames(&self) -> &str {
        &self.frames
    }

    pub fn signature(&self) -> u64 {
        self.hash
    }
}

const INTERNAL_FRAMES: [&str; 5] = [
    "std::backtrace",
    "core::",
    "wiretap_store::",
    "wiretap::",
    "wiretap_registry::",
];

fn is_internal(symbol: &str) -> bool {
    let symbol = symbol.trim_start_matches('<');
    INTERNAL_FRAMES.iter().any(|prefix| symbol.starts_with(prefix))
}

/// Drops the leading frames of a formatted backtrace that belong to the
/// capture itself.
fn caller_frames(backtrace: &str) -> String {
    let mut frames: Vec<(&str, Vec<&str>)> = Vec::new();

    for line in backtrace.lines() {
        let header = line.trim_start().split_once(": ").filter(|(index, _)| {
            !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit())
        });

        if let Some((_, symbol)) = header {
            frames.push((symbol, vec![line]));
        } else if let Some((_, lines)) = frames.last_mut() {
            lines.push(line);
        }
    }

    frames
        .into_iter()
        .skip_while(|(symbol, _)| is_internal(symbol))
        .flat_map(|(_, lines)| lines)
        .collect::<Vec<_>>()
        .join("\n")
}

impl PartialEq for CallSite {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && (Arc::ptr_eq(&self.frames, &other.frames) || self.frames == other.frames)
    }
}

impl Eq for CallSite {}

impl Hash for CallSite {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSite")
            .field("signature", &format_args!("{:016x}", self.hash))
            .finish()
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.frames)
    }
}

/// Who made a call: the thread and, optionally, where from.
///
/// A context recorded by an interception point always has a thread. The
/// `thread: None` form only appears on coarsened keys that aggregate over
/// every thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionContext {
    pub thread: Option<ThreadMeta>,
    pub call_site: Option<CallSite>,
}

impl ExecutionContext {
    pub fn current() -> Self {
        Self {
            thread: Some(ThreadMeta::current()),
            call_site: None,
        }
    }

    pub fn capture(with_call_site: bool) -> Self {
        Self {
            thread: Some(ThreadMeta::current()),
            call_site: with_call_site.then(CallSite::capture),
        }
    }

    pub fn new(thread: ThreadMeta, call_site: Option<CallSite>) -> Self {
        Self {
            thread: Some(thread),
            call_site,
        }
    }

    pub fn thread_id(&self) -> Option<ThreadId> {
        self.thread.as_ref().map(|t| t.id)
    }

    pub fn is_thread(&self, id: ThreadId) -> bool {
        self.thread_id() == Some(id)
    }

    pub fn without_call_site(&self) -> Self {
        Self {
            thread: self.thread.clone(),
            call_site: None,
        }
    }

    pub fn without_thread(&self) -> Self {
        Self {
            thread: None,
            call_site: self.call_site.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_meta_equality_ignores_name() {
        let a = ThreadMeta::current();
        let mut b = a.clone();
        b.name = Some(Arc::from("renamed"));

        assert_eq!(a, b);
    }

    #[test]
    fn independently_built_call_sites_with_same_frames_are_equal() {
        let a = CallSite::new("at foo\nat bar");
        let b = CallSite::new(String::from("at foo\nat bar"));
        let c = CallSite::new("at foo\nat baz");

        assert_eq!(a, b);
        assert_eq!(a.signature(), b.signature());
        assert_ne!(a, c);
    }

    #[test]
    fn contexts_differ_by_thread() {
        let here = ExecutionContext::current();
        let there = thread::spawn(ExecutionContext::current).join().unwrap();

        assert_ne!(here, there);
        assert!(here.is_thread(thread::current().id()));
        assert!(!there.is_thread(thread::current().id()));
    }

    #[test]
    fn named_threads_are_grouped_by_name_prefix() {
        let group = thread::Builder::new()
            .name("pool-7".to_owned())
            .spawn(|| ThreadMeta::current().group)
            .unwrap()
            .join()
            .unwrap();

        assert_eq!(group.as_deref(), Some("pool"));
        assert_eq!(group_of("main"), Some("main"));
        assert_eq!(group_of("42"), None);
        assert_eq!(ThreadMeta::current().group("batch").group.as_deref(), Some("batch"));
    }

    #[test]
    fn call_site_skips_capture_frames() {
        let ctx = ExecutionContext::capture(true);
        let frames = ctx.call_site.unwrap().frames().to_owned();

        assert!(!frames.contains("CallSite::capture"));
        assert!(!frames.contains("ExecutionContext::capture"));
        assert!(!frames.contains("Backtrace::force_capture"));
    }

    #[test]
    fn caller_frames_keeps_everything_after_internal_frames() {
        let backtrace = "   0: std::backtrace::Backtrace::force_capture
             at /rustc/library/std/src/backtrace.rs:312:9
   1: wiretap_store::context::CallSite::capture
             at ./src/context.rs:95:18
   2: <wiretap::wiretap::Wiretap as core::clone::Clone>::clone
   3: app::orders::load
             at ./src/orders.rs:12:5
   4: wiretap_store::context::tests::helper";

        assert_eq!(
            caller_frames(backtrace),
            "   3: app::orders::load
             at ./src/orders.rs:12:5
   4: wiretap_store::context::tests::helper"
        );
    }

    #[test]
    fn capture_with_call_site() {
        let ctx = ExecutionContext::capture(true);

        assert!(ctx.call_site.is_some());
        assert!(ctx.without_call_site().call_site.is_none());
        assert!(ctx.without_thread().thread.is_none());
    }
}
