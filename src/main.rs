#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    report_renderer_server::run().await
}
