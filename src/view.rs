//! Presentation of a patched tree as HTML text.
//!
//! Lazy references resolve through a [`LazyResolver`]. A module that is still
//! loading renders its loading affordance and leaves a handle in
//! [`Rendered::pending`]; the caller renders again once those complete.

use futures::future::join_all;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::lazy::{LazyResolver, ModuleResolution, PendingModule};
use crate::streaming::patcher::PatchedTree;
use crate::streaming::pipeline::ViewState;
use crate::tree::{Node, PlaceholderId, Props, Scalar};

/// Limit on nested module expansions, guards against a module that renders
/// itself.
const MAX_MODULE_DEPTH: usize = 64;

/// A lazily loaded client implementation.
pub trait ClientComponent: Send + Sync {
    fn render(&self, props: &Props) -> Node;
}

impl<F> ClientComponent for F
where
    F: Fn(&Props) -> Node + Send + Sync,
{
    fn render(&self, props: &Props) -> Node {
        self(props)
    }
}

pub type ClientModule = Arc<dyn ClientComponent>;

pub struct Rendered {
    pub html: String,
    pub pending: Vec<PendingModule<ClientModule>>,
}

impl Rendered {
    pub fn is_settled(&self) -> bool {
        self.pending.is_empty()
    }
}

struct HtmlWriter<'a> {
    out: String,
    tree: Option<&'a PatchedTree>,
    resolver: &'a LazyResolver<ClientModule>,
    pending: Vec<PendingModule<ClientModule>>,
}

impl<'a> HtmlWriter<'a> {
    fn node(&mut self, node: &Node, depth: usize) {
        match node {
            Node::Leaf(scalar) => match scalar {
                Scalar::String(s) => escape_into(&mut self.out, s),
                Scalar::Number(n) => {
                    let _ = write!(self.out, "{}", n);
                }
                Scalar::Bool(_) | Scalar::Null => {}
            },
            Node::Sequence(items) => {
                for item in items {
                    self.node(item, depth);
                }
            }
            Node::Element {
                tag,
                props,
                children,
            } => {
                self.out.push('<');
                self.out.push_str(tag);
                self.attributes(props);
                self.out.push('>');
                self.node(children, depth);
                self.out.push_str("</");
                self.out.push_str(tag);
                self.out.push('>');
            }
            Node::Placeholder { id } => self.placeholder(id),
            Node::LazyRef { name, props } => self.module(name, props, depth),
            Node::ComponentRef { name, .. } => {
                self.error("component", name, "component was not rendered")
            }
        }
    }

    fn attributes(&mut self, props: &Props) {
        for (key, value) in props {
            match value {
                Node::Leaf(Scalar::String(s)) => {
                    let _ = write!(self.out, " {}=\"", key);
                    escape_into(&mut self.out, s);
                    self.out.push('"');
                }
                Node::Leaf(Scalar::Number(n)) => {
                    let _ = write!(self.out, " {}=\"{}\"", key, n);
                }
                Node::Leaf(Scalar::Bool(true)) => {
                    let _ = write!(self.out, " {}", key);
                }
                // Nested trees are props for components, not attributes
                _ => {}
            }
        }
    }

    fn placeholder(&mut self, id: &PlaceholderId) {
        match self.tree.and_then(|tree| tree.failure(id)) {
            Some(reason) => self.error("placeholder", id.as_str(), reason),
            None => self.loading("placeholder", id.as_str()),
        }
    }

    fn module(&mut self, name: &str, props: &Props, depth: usize) {
        if depth >= MAX_MODULE_DEPTH {
            self.error("module", name, "module nesting too deep");
            return;
        }
        match self.resolver.resolve(name) {
            ModuleResolution::Ready(module) => {
                let expansion = module.render(props);
                self.node(&expansion, depth + 1);
            }
            ModuleResolution::Pending(handle) => {
                self.loading("module", name);
                self.pending.push(handle);
            }
            ModuleResolution::Failed(reason) => self.error("module", name, &reason),
        }
    }

    fn loading(&mut self, attr: &str, name: &str) {
        let _ = write!(self.out, "<div class=\"ts-loading\" data-{}=\"", attr);
        escape_into(&mut self.out, name);
        self.out.push_str("\">Loading...</div>");
    }

    fn error(&mut self, attr: &str, name: &str, reason: &str) {
        let _ = write!(self.out, "<div class=\"ts-error\" data-{}=\"", attr);
        escape_into(&mut self.out, name);
        self.out.push_str("\">");
        escape_into(&mut self.out, reason);
        self.out.push_str("</div>");
    }
}

fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
}

/// Render the current tree once.
pub fn render_html(tree: &PatchedTree, resolver: &LazyResolver<ClientModule>) -> Rendered {
    let mut writer = HtmlWriter {
        out: String::new(),
        tree: Some(tree),
        resolver,
        pending: Vec::new(),
    };
    writer.node(&tree.root, 0);
    Rendered {
        html: writer.out,
        pending: writer.pending,
    }
}

/// Render a session view. A session-fatal error replaces the whole view.
pub fn render_state(state: &ViewState, resolver: &LazyResolver<ClientModule>) -> Rendered {
    match state {
        ViewState::Ready(tree) => render_html(tree, resolver),
        ViewState::Loading => {
            let mut writer = HtmlWriter {
                out: String::new(),
                tree: None,
                resolver,
                pending: Vec::new(),
            };
            writer.loading("session", "root");
            Rendered {
                html: writer.out,
                pending: Vec::new(),
            }
        }
        ViewState::Failed(reason) => {
            let mut writer = HtmlWriter {
                out: String::new(),
                tree: None,
                resolver,
                pending: Vec::new(),
            };
            writer.error("session", "root", reason);
            Rendered {
                html: writer.out,
                pending: Vec::new(),
            }
        }
    }
}

/// Render, wait for every pending module, and render again until nothing is
/// pending.
pub async fn render_settled(tree: &PatchedTree, resolver: &LazyResolver<ClientModule>) -> String {
    loop {
        let rendered = render_html(tree, resolver);
        if rendered.is_settled() {
            return rendered.html;
        }
        join_all(rendered.pending.into_iter().map(PendingModule::wait)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lazy::ModuleSource;
    use crate::tree::props;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Modules {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl ModuleSource<ClientModule> for Modules {
        async fn load(&self, name: &str) -> Result<ClientModule, String> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            match name {
                "Like" => Ok(Arc::new(|props: &Props| {
                    let count = props.get("count").cloned().unwrap_or_else(Node::null);
                    Node::element(
                        "button",
                        Props::new(),
                        Node::Sequence(vec![Node::text("Like "), count]),
                    )
                })),
                "Loop" => Ok(Arc::new(|_: &Props| Node::lazy("Loop", Props::new()))),
                _ => Err(format!("no module {}", name)),
            }
        }
    }

    fn resolver() -> (Arc<Modules>, LazyResolver<ClientModule>) {
        let modules = Arc::new(Modules {
            loads: AtomicUsize::new(0),
        });
        (modules.clone(), LazyResolver::new(modules))
    }

    #[tokio::test]
    async fn test_elements_and_escaping() {
        let (_, resolver) = resolver();
        let tree = PatchedTree::new(Node::element(
            "p",
            props([
                ("class", Node::text("a\"b")),
                ("hidden", Node::bool(true)),
                ("draft", Node::bool(false)),
            ]),
            Node::Sequence(vec![Node::text("1 < 2"), Node::number(3), Node::null()]),
        ));
        let rendered = render_html(&tree, &resolver);
        assert!(rendered.is_settled());
        assert_eq!(rendered.html, "<p class=\"a&quot;b\" hidden>1 &lt; 23</p>");
    }

    #[tokio::test]
    async fn test_placeholder_affordances() {
        let (_, resolver) = resolver();
        let mut tree = PatchedTree::new(Node::Sequence(vec![
            Node::placeholder(PlaceholderId::new(0)),
            Node::placeholder(PlaceholderId::new(1)),
        ]));
        tree.failed.insert(PlaceholderId::new(1), "post missing".into());

        let html = render_html(&tree, &resolver).html;
        assert_eq!(
            html,
            "<div class=\"ts-loading\" data-placeholder=\"C:0\">Loading...</div>\
             <div class=\"ts-error\" data-placeholder=\"C:1\">post missing</div>"
        );
    }

    #[tokio::test]
    async fn test_lazy_suspend_and_retry() {
        let (modules, resolver) = resolver();
        let tree = PatchedTree::new(Node::Sequence(vec![
            Node::lazy("Like", props([("count", Node::number(2))])),
            Node::lazy("Like", props([("count", Node::number(5))])),
        ]));

        let first = render_html(&tree, &resolver);
        assert_eq!(first.pending.len(), 2);
        assert!(first.html.contains("data-module=\"Like\""));

        let html = render_settled(&tree, &resolver).await;
        assert_eq!(html, "<button>Like 2</button><button>Like 5</button>");

        // Remounting reuses the resolved module
        render_settled(&tree, &resolver).await;
        assert_eq!(modules.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_and_runaway_modules() {
        let (_, resolver) = resolver();
        let tree = PatchedTree::new(Node::Sequence(vec![
            Node::lazy("Missing", Props::new()),
            Node::lazy("Loop", Props::new()),
        ]));
        let html = render_settled(&tree, &resolver).await;
        assert!(html.contains("no module Missing"));
        assert!(html.contains("module nesting too deep"));
    }

    #[tokio::test]
    async fn test_session_failure_replaces_view() {
        let (_, resolver) = resolver();
        let rendered = render_state(&ViewState::Failed("bad record".into()), &resolver);
        assert_eq!(
            rendered.html,
            "<div class=\"ts-error\" data-session=\"root\">bad record</div>"
        );
    }
}
