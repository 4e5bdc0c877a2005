use std::path::PathBuf;
use log::info;
use serde_json::Value;
use crate::error::JobError;
use crate::workspace::Workspace;

/// Name of the edit spec file editly reads inside each workspace
pub const SPEC_FILE_NAME: &str = "spec.json";

/// Write the edit spec into the workspace, pretty-printed with keys in request order
pub async fn write_spec(workspace: &Workspace, spec: &Value) -> Result<PathBuf, JobError> {
    let spec_path = workspace.file(SPEC_FILE_NAME);
    let text = serde_json::to_string_pretty(spec)?;

    tokio::fs::write(&spec_path, text)
        .await
        .map_err(|source| JobError::SpecWrite { path: spec_path.clone(), source })?;

    info!("Spec written to: {}", spec_path.display());
    Ok(spec_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_spec_is_written_pretty_and_unchanged() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::acquire(root.path(), "render_1_spec").await.unwrap();
        let spec = json!({
            "outPath": "ignored.mp4",
            "width": 640,
            "clips": [{ "layers": [{ "type": "title", "text": "hello" }] }],
        });

        let path = write_spec(&ws, &spec).await.unwrap();
        assert_eq!(path, ws.path().join("spec.json"));

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("\n  \""), "expected two-space indentation");
        let parsed: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed, spec);

        ws.release().await;
    }

    #[tokio::test]
    async fn test_key_order_is_kept() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::acquire(root.path(), "render_3_spec").await.unwrap();
        let spec: Value = serde_json::from_str(r#"{"zeta":1,"width":2,"alpha":{"y":0,"b":0}}"#).unwrap();

        let written = std::fs::read_to_string(write_spec(&ws, &spec).await.unwrap()).unwrap();
        let pos = |key: &str| written.find(&format!("\"{}\"", key)).unwrap();
        assert!(pos("zeta") < pos("width"));
        assert!(pos("width") < pos("alpha"));
        assert!(pos("y") < pos("b"));

        ws.release().await;
    }

    #[tokio::test]
    async fn test_write_fails_when_workspace_is_gone() {
        let root = tempfile::tempdir().unwrap();
        let ws = Workspace::acquire(root.path(), "render_2_spec").await.unwrap();
        std::fs::remove_dir_all(ws.path()).unwrap();

        let result = write_spec(&ws, &json!({})).await;
        assert!(matches!(result, Err(JobError::SpecWrite { .. })));
    }
}
