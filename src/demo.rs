//! Demo content: a tiny blog.
//!
//! `List` and `Detail` are immediate server components; `PostList` and
//! `PostDetail` wait on a slow post store and stream in later. `Like` and
//! `Link` are client modules.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::lazy::ModuleSource;
use crate::streaming::producer::{ComponentRegistry, Production};
use crate::tree::{props, Node, Props, Scalar};
use crate::view::ClientModule;

pub struct Post {
    pub permalink: &'static str,
    pub title: &'static str,
    pub content: &'static str,
}

pub const POSTS: &[Post] = &[
    Post {
        permalink: "streaming-trees",
        title: "Streaming trees",
        content: "Send what you have, patch in the rest.",
    },
    Post {
        permalink: "lazy-modules",
        title: "Lazy modules",
        content: "Load client code only when a tree asks for it.",
    },
];

fn prop_str<'a>(props: &'a Props, key: &str) -> Option<&'a str> {
    match props.get(key) {
        Some(Node::Leaf(Scalar::String(s))) => Some(s),
        _ => None,
    }
}

fn link(href: String, label: &str) -> Node {
    Node::client("Link", props([("href", Node::text(href)), ("label", Node::text(label))]))
}

fn list_page(_: &Props) -> Production {
    Production::Ready(Node::element(
        "div",
        Props::new(),
        Node::Sequence(vec![
            Node::element("h2", Props::new(), Node::text("Post List")),
            Node::server("PostList", Props::new()),
        ]),
    ))
}

fn detail_page(page_props: &Props) -> Production {
    let permalink = prop_str(page_props, "permalink").unwrap_or_default();
    Production::Ready(Node::element(
        "div",
        Props::new(),
        Node::Sequence(vec![
            Node::element("p", Props::new(), link("/".to_string(), "← post list")),
            Node::client("Like", Props::new()),
            Node::server("PostDetail", props([("permalink", Node::text(permalink))])),
        ]),
    ))
}

/// Components served by `treestream serve`.
pub fn registry(delay: Duration) -> ComponentRegistry {
    ComponentRegistry::new()
        .server("List", list_page)
        .server("Detail", detail_page)
        .server("PostList", move |_| {
            Production::pending(async move {
                tokio::time::sleep(delay).await;
                let items = POSTS
                    .iter()
                    .map(|post| {
                        Node::element(
                            "li",
                            Props::new(),
                            link(format!("/post/{}", post.permalink), post.title),
                        )
                    })
                    .collect();
                Ok(Node::element("ol", Props::new(), Node::Sequence(items)))
            })
        })
        .server("PostDetail", move |detail_props| {
            let permalink = prop_str(detail_props, "permalink").map(str::to_string);
            Production::pending(async move {
                tokio::time::sleep(delay).await;
                let post = POSTS
                    .iter()
                    .find(|post| Some(post.permalink) == permalink.as_deref())
                    .ok_or_else(|| format!("post {:?} not found", permalink.unwrap_or_default()))?;
                Ok(Node::element(
                    "article",
                    Props::new(),
                    Node::Sequence(vec![
                        Node::element("h1", Props::new(), Node::text(post.title)),
                        Node::element("p", Props::new(), Node::text(post.content)),
                    ]),
                ))
            })
        })
        .client("Like")
        .client("Link")
}

/// Client modules for the demo, loaded after a simulated fetch delay.
pub struct DemoModules {
    pub delay: Duration,
}

#[async_trait]
impl ModuleSource<ClientModule> for DemoModules {
    async fn load(&self, name: &str) -> Result<ClientModule, String> {
        tokio::time::sleep(self.delay).await;
        match name {
            "Like" => Ok(Arc::new(|_: &Props| {
                Node::element("button", Props::new(), Node::text("I like it!(0)"))
            })),
            "Link" => Ok(Arc::new(|link_props: &Props| {
                let href = prop_str(link_props, "href").unwrap_or("#").to_string();
                let label = link_props.get("label").cloned().unwrap_or_else(Node::null);
                Node::element("a", props([("href", Node::text(href))]), label)
            })),
            _ => Err(format!("no client module named {:?}", name)),
        }
    }
}
