#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use treestream::demo::{self, DemoModules};
    use treestream::lazy::LazyResolver;
    use treestream::server::RenderServer;
    use treestream::streaming::pipeline::{settled, SessionCache, ViewState};
    use treestream::transport::TcpTransport;
    use treestream::view::render_settled;
    use treestream::{props, Node, Props};

    async fn start_server() -> anyhow::Result<SocketAddr> {
        let registry = demo::registry(Duration::from_millis(5));
        let server = RenderServer::bind("127.0.0.1:0".parse()?, Arc::new(registry)).await?;
        let addr = server.local_addr()?;
        tokio::spawn(server.run());
        Ok(addr)
    }

    fn resolver() -> LazyResolver<treestream::view::ClientModule> {
        LazyResolver::new(Arc::new(DemoModules {
            delay: Duration::from_millis(1),
        }))
    }

    #[tokio::test]
    async fn test_fetch_list_over_tcp() -> anyhow::Result<()> {
        let addr = start_server().await?;
        let sessions = SessionCache::new(Arc::new(TcpTransport::new(addr)));

        let view = settled(sessions.mount("List", Props::new())?).await;
        let tree = view.tree().expect("session should have a tree");
        assert!(tree.failed.is_empty());

        let html = render_settled(tree, &resolver()).await;
        assert!(html.starts_with("<div><h2>Post List</h2><ol>"));
        for post in demo::POSTS {
            assert!(html.contains(&format!(
                "<a href=\"/post/{}\">{}</a>",
                post.permalink, post.title
            )));
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_detail_over_tcp() -> anyhow::Result<()> {
        let addr = start_server().await?;
        let sessions = SessionCache::new(Arc::new(TcpTransport::new(addr)));
        let post = &demo::POSTS[0];

        let found = sessions.mount("Detail", props([("permalink", Node::text(post.permalink))]))?;
        let missing = sessions.mount("Detail", props([("permalink", Node::text("missing"))]))?;
        let (found, missing) = tokio::join!(settled(found), settled(missing));

        let html = render_settled(found.tree().expect("tree"), &resolver()).await;
        assert!(html.contains(&format!("<h1>{}</h1>", post.title)));
        assert!(html.contains("<button>I like it!(0)</button>"));

        let missing = missing.tree().expect("tree");
        assert_eq!(missing.failed.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_root_fails_session() -> anyhow::Result<()> {
        let addr = start_server().await?;
        let sessions = SessionCache::new(Arc::new(TcpTransport::new(addr)));

        let view = settled(sessions.mount("Nope", Props::new())?).await;
        assert!(matches!(view, ViewState::Failed(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_connection_refused_fails_session() -> anyhow::Result<()> {
        // Bind then drop to get an address nothing listens on
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
            listener.local_addr()?
        };
        let sessions = SessionCache::new(Arc::new(TcpTransport::new(addr)));

        let view = settled(sessions.mount("List", Props::new())?).await;
        assert!(matches!(view, ViewState::Failed(_)));
        Ok(())
    }
}
