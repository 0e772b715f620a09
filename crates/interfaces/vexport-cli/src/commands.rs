use std::sync::Arc;

use anyhow::Context;
use humansize::{format_size, DECIMAL};
use tokio_util::sync::CancellationToken;
use vexport_infra::{http_client, ClientOptions, HttpSession};
use vexport_pipeline::export::{HttpConnection, HttpLeaseGateway};
use vexport_pipeline::{ExportError, ExportOptions, ExportPlan, ExportSession, ExportSummary};

use crate::render::IndicatifSink;
use crate::ExportRequest;

fn connect(req: &ExportRequest) -> anyhow::Result<HttpSession> {
    let opts = ClientOptions {
        bearer_token: req.token.clone(),
        accept_invalid_certs: req.insecure,
        ..ClientOptions::default()
    };
    let client = http_client(&opts).context("Failed to build HTTP client")?;
    HttpSession::new(client, &req.endpoint)
        .with_context(|| format!("Invalid endpoint {}", req.endpoint))
}

fn export_options(req: &ExportRequest) -> ExportOptions {
    ExportOptions {
        max_concurrent_transfers: vexport_config::clamp_transfers(req.threads),
        rate_limit_bytes: req.rate_limit_bytes(),
        ..ExportOptions::default()
    }
}

pub async fn cmd_export(
    req: ExportRequest,
    cancel: CancellationToken,
) -> anyhow::Result<ExportSummary> {
    println!(":: Exporting {}", req.vm);
    println!("   Endpoint: {}", req.endpoint);
    println!("   Target:   {}", req.destination);

    let session = connect(&req)?;
    let vm = HttpLeaseGateway::new(session.clone(), req.vm.clone());
    let sink = Arc::new(IndicatifSink::new());
    let export = ExportSession::new(Arc::new(HttpConnection::new(session)), export_options(&req))
        .with_progress_sink(sink.clone());

    let result = export.export(&vm, &req.destination, &cancel).await;
    match &result {
        Ok(_) => sink.finish("Export complete"),
        Err(ExportError::Cancelled) => sink.finish("Export cancelled"),
        Err(_) => sink.finish("Export failed"),
    }
    let summary = result.with_context(|| format!("Export of {} failed", req.vm))?;

    println!("\n:: Export Result");
    println!("   Files:   {}", summary.items_transferred);
    println!(
        "   Size:    {}",
        format_size(summary.bytes_transferred, DECIMAL)
    );
    println!("   Skipped: {}", summary.skipped_devices);
    for file in &summary.files {
        println!("   {} ({})", file.path, format_size(file.bytes, DECIMAL));
    }
    if let Some(warning) = &summary.finalization_warning {
        println!("   Warning: {warning} (files are complete on disk)");
    }

    Ok(summary)
}

/// Lists what an export would fetch; the lease is aborted afterwards.
pub async fn cmd_dry_run(
    req: ExportRequest,
    cancel: CancellationToken,
) -> anyhow::Result<ExportPlan> {
    println!(":: Inspecting export lease for {}", req.vm);

    let session = connect(&req)?;
    let vm = HttpLeaseGateway::new(session.clone(), req.vm.clone());
    let export = ExportSession::new(Arc::new(HttpConnection::new(session)), export_options(&req));

    let plan = export
        .inspect(&vm, &cancel)
        .await
        .with_context(|| format!("Inspecting {} failed", req.vm))?;

    for item in &plan.items {
        println!("device target: {}", item.target_id);
        match item.size_hint {
            Some(size) => println!("file size: {} ({})", size, format_size(size, DECIMAL)),
            None => println!("file size: unknown"),
        }
        println!("url: {}", item.url);
        println!("   -> {}", req.destination.join(&item.file_name));
    }
    println!(
        "\n:: {} files, {} devices skipped (lease {})",
        plan.items.len(),
        plan.skipped_devices,
        plan.lease_id
    );

    Ok(plan)
}
