use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facelens_core::{
    AnalysisTask, Analyzer, Detection, Embedding, FaceAnalyzer, ModelFiles, PixelBuffer,
};
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// Matches the daemon's default pixel limit.
const LOCAL_MAX_PIXELS: u64 = 40_000_000;

#[derive(Parser)]
#[command(name = "facelens", about = "facelens face analysis CLI")]
struct Cli {
    /// Base URL of a running facelensd
    #[arg(long, global = true, default_value = "http://127.0.0.1:3000")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon liveness and model readiness
    Status,
    /// Estimate expressions and age for an image
    Analyze { image: PathBuf },
    /// Estimate age only
    Age { image: PathBuf },
    /// Print the 512-d face descriptor
    Descriptor { image: PathBuf },
    /// Compare the faces in two images
    Compare { first: PathBuf, second: PathBuf },
    /// Run the models in-process, without a daemon
    Local {
        image: PathBuf,
        /// Directory containing the ONNX models
        #[arg(long)]
        model_dir: Option<PathBuf>,
        /// Skip expression classification
        #[arg(long)]
        age_only: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Status => {
            let live = client
                .get(endpoint(&cli.url, "/status"))
                .send()
                .await
                .with_context(|| format!("facelensd not reachable at {}", cli.url))?
                .text()
                .await?;
            println!("facelensd: {live}");

            let ready: Value = client
                .get(endpoint(&cli.url, "/ready"))
                .send()
                .await?
                .json()
                .await?;
            println!("models:    {}", ready["status"].as_str().unwrap_or("unknown"));
            if let Some(details) = ready["details"].as_str() {
                println!("details:   {details}");
            }
        }
        Commands::Analyze { image } => {
            let body = upload(&client, &cli.url, "/analyze", &image).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::Age { image } => {
            let body = upload(&client, &cli.url, "/analyze/age", &image).await?;
            match body["age"].as_f64() {
                Some(age) => println!("{age:.1}"),
                None => bail!("unexpected response: {body}"),
            }
        }
        Commands::Descriptor { image } => {
            let body = upload(&client, &cli.url, "/analyze/descriptor", &image).await?;
            println!("{}", serde_json::to_string(&body["descriptor"])?);
        }
        Commands::Compare { first, second } => {
            let a = descriptor(&client, &cli.url, &first).await?;
            let b = descriptor(&client, &cli.url, &second).await?;
            println!("cosine similarity:  {:.4}", a.similarity(&b));
            println!("euclidean distance: {:.4}", a.euclidean_distance(&b));
        }
        Commands::Local {
            image,
            model_dir,
            age_only,
        } => {
            let model_dir = model_dir.unwrap_or_else(facelens_core::default_model_dir);
            let task = if age_only {
                AnalysisTask::AgeOnly
            } else {
                AnalysisTask::Full
            };
            let detection = tokio::task::spawn_blocking(move || -> Result<_> {
                let mut analyzer = FaceAnalyzer::load(&model_dir, &ModelFiles::default(), 2)?;
                let pixels = PixelBuffer::open(&image, LOCAL_MAX_PIXELS)?;
                Ok(analyzer.analyze(&pixels, task)?)
            })
            .await??;

            let Some(detection) = detection else {
                bail!("no face detected");
            };
            println!("{}", serde_json::to_string_pretty(&local_response(&detection, task))?);
        }
    }

    Ok(())
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}{path}", base.trim_end_matches('/'))
}

/// POST `image` as the multipart `image` field and return the JSON body.
async fn upload(client: &reqwest::Client, base: &str, path: &str, image: &Path) -> Result<Value> {
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("failed to read {}", image.display()))?;
    let file_name = image
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let form = Form::new().part("image", Part::bytes(bytes).file_name(file_name));

    let response = client
        .post(endpoint(base, path))
        .multipart(form)
        .send()
        .await
        .with_context(|| format!("facelensd not reachable at {base}"))?;
    let status = response.status();
    let text = response.text().await?;
    tracing::debug!(%status, "{path} responded");
    interpret(status.as_u16(), &text)
}

/// Check the status before trusting the body to be JSON.
fn interpret(status: u16, text: &str) -> Result<Value> {
    if !(200..300).contains(&status) {
        let body = serde_json::from_str(text).unwrap_or(Value::Null);
        bail!("{}", describe_failure(status, &body, text));
    }
    serde_json::from_str(text).context("response was not JSON")
}

async fn descriptor(client: &reqwest::Client, base: &str, image: &Path) -> Result<Embedding> {
    let body = upload(client, base, "/analyze/descriptor", image).await?;
    parse_descriptor(&body).with_context(|| format!("bad descriptor for {}", image.display()))
}

fn parse_descriptor(body: &Value) -> Result<Embedding> {
    let values = body["descriptor"]
        .as_array()
        .context("missing `descriptor` array")?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32).context("non-numeric descriptor value"))
        .collect::<Result<Vec<f32>>>()?;
    Ok(Embedding {
        values,
        model_version: None,
    })
}

/// Shape a local result like the matching server response.
fn local_response(detection: &Detection, task: AnalysisTask) -> Value {
    let age = detection.age_gender.map(|ag| ag.age);
    match task {
        AnalysisTask::AgeOnly => json!({ "age": age }),
        AnalysisTask::Descriptor => json!({ "descriptor": detection.descriptor.as_ref().map(|d| &d.values) }),
        AnalysisTask::Full => json!({ "expressions": detection.expressions, "age": age }),
    }
}

fn describe_failure(status: u16, body: &Value, raw: &str) -> String {
    match (body["error"].as_str(), body["details"].as_str()) {
        (Some(error), Some(details)) => format!("{error} ({status}): {details}"),
        (Some(error), None) => format!("{error} ({status})"),
        _ if !raw.trim().is_empty() => format!("request failed with status {status}: {}", raw.trim()),
        _ => format!("request failed with status {status}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facelens_core::{AgeGender, BoundingBox, Gender};

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        assert_eq!(endpoint("http://host:3000/", "/analyze"), "http://host:3000/analyze");
        assert_eq!(endpoint("http://host:3000", "/status"), "http://host:3000/status");
    }

    #[test]
    fn test_parse_descriptor() {
        let embedding = parse_descriptor(&json!({ "descriptor": [0.6, 0.8] })).unwrap();
        assert_eq!(embedding.values.len(), 2);
        assert!((embedding.similarity(&embedding) - 1.0).abs() < 1e-5);

        assert!(parse_descriptor(&json!({ "age": 30 })).is_err());
        assert!(parse_descriptor(&json!({ "descriptor": ["x"] })).is_err());
    }

    #[test]
    fn test_local_response_matches_server_shape() {
        let mut detection = Detection::new(BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
            confidence: 0.9,
            landmarks: None,
        });
        detection.age_gender = Some(AgeGender {
            age: 42.0,
            gender: Gender::Male,
            gender_probability: 0.8,
        });

        let body = local_response(&detection, AnalysisTask::AgeOnly);
        assert_eq!(body, json!({ "age": 42.0 }));
    }

    #[test]
    fn test_describe_failure() {
        let body = json!({ "error": "No face detected", "details": "none" });
        assert_eq!(describe_failure(404, &body, ""), "No face detected (404): none");
        assert_eq!(describe_failure(502, &Value::Null, ""), "request failed with status 502");
    }

    #[test]
    fn test_interpret_keeps_status_of_plain_text_errors() {
        let err = interpret(405, "Method Not Allowed").unwrap_err();
        assert_eq!(err.to_string(), "request failed with status 405: Method Not Allowed");

        let err = interpret(404, r#"{"error":"No face detected","details":"none"}"#).unwrap_err();
        assert_eq!(err.to_string(), "No face detected (404): none");

        let body = interpret(200, r#"{"age": 30.5}"#).unwrap();
        assert_eq!(body["age"], 30.5);
        assert!(interpret(200, "operational").is_err());
    }

    #[test]
    fn test_cli_parses_local_flags() {
        let cli = Cli::try_parse_from(["facelens", "local", "face.jpg", "--age-only"]).unwrap();
        assert_eq!(cli.url, "http://127.0.0.1:3000");
        match cli.command {
            Commands::Local { image, age_only, model_dir } => {
                assert_eq!(image, PathBuf::from("face.jpg"));
                assert!(age_only);
                assert!(model_dir.is_none());
            }
            _ => panic!("expected local"),
        }
    }
}
