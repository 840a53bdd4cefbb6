use anyhow::Result;
use oxigraph::io::{RdfFormat, RdfParser};
use oxigraph::model::Quad;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use widequad::config::Config;
use widequad::MemorySession;
use widequad_cli::run_from_args;

fn run(store: &Path, args: &[&str]) -> Result<()> {
    let mut argv = vec!["widequad", "--store", store.to_str().unwrap()];
    argv.extend_from_slice(args);
    run_from_args(argv)
}

fn read_quads(path: &Path) -> Vec<Quad> {
    RdfParser::from_format(RdfFormat::NQuads)
        .for_reader(fs::File::open(path).unwrap())
        .map(|q| q.unwrap())
        .collect()
}

#[test]
fn binary_round_trips_through_the_store_file() -> Result<()> {
    let dir = TempDir::new()?;
    let store = dir.path().join("store.json");
    let input = dir.path().join("input.bin");
    let output = dir.path().join("output.bin");
    let content: Vec<u8> = (0..5_000u32).map(|i| (i * 7 % 251) as u8).collect();
    fs::write(&input, &content)?;

    run(
        &store,
        &[
            "put-binary",
            "http://example.com/blob",
            input.to_str().unwrap(),
            "--chunk-size",
            "1000",
        ],
    )?;
    assert_eq!(
        MemorySession::load(&store)?.chunk_indices("http://example.com/blob"),
        vec![0, 1, 2, 3, 4]
    );

    run(
        &store,
        &[
            "cat-binary",
            "http://example.com/blob",
            "--output",
            output.to_str().unwrap(),
        ],
    )?;
    assert_eq!(fs::read(&output)?, content);

    run(
        &store,
        &[
            "cat-binary",
            "http://example.com/blob",
            "--from",
            "995",
            "--to",
            "1004",
            "--output",
            output.to_str().unwrap(),
        ],
    )?;
    assert_eq!(fs::read(&output)?, content[995..=1004]);

    run(&store, &["rm-binary", "http://example.com/blob"])?;
    assert!(MemorySession::load(&store)?
        .chunk_indices("http://example.com/blob")
        .is_empty());
    Ok(())
}

#[test]
fn container_quads_include_containment() -> Result<()> {
    let dir = TempDir::new()?;
    let store = dir.path().join("store.json");
    let body = dir.path().join("body.nq");
    let output = dir.path().join("out.nq");
    fs::write(
        &body,
        "<http://example.com/c> <http://purl.org/dc/terms/title> \"box\" .\n",
    )?;

    run(
        &store,
        &[
            "create",
            "http://example.com/c",
            "--model",
            "BasicContainer",
            "--file",
            body.to_str().unwrap(),
        ],
    )?;
    for child in ["http://example.com/c/1", "http://example.com/c/2"] {
        run(
            &store,
            &["create", child, "--container", "http://example.com/c"],
        )?;
    }
    run(
        &store,
        &[
            "quads",
            "http://example.com/c",
            "--output",
            output.to_str().unwrap(),
        ],
    )?;

    let quads = read_quads(&output);
    assert_eq!(quads.len(), 5);
    let contains = quads
        .iter()
        .filter(|q| q.predicate.as_str() == "http://www.w3.org/ns/ldp#contains")
        .count();
    assert_eq!(contains, 4);
    Ok(())
}

#[test]
fn touch_and_delete_need_an_existing_resource() -> Result<()> {
    let dir = TempDir::new()?;
    let store = dir.path().join("store.json");
    assert!(run(&store, &["touch", "http://example.com/none"]).is_err());
    assert!(run(&store, &["info", "http://example.com/none"]).is_err());

    run(&store, &["create", "http://example.com/r"])?;
    run(&store, &["touch", "http://example.com/r"])?;
    run(&store, &["info", "http://example.com/r", "--json"])?;
    run(&store, &["delete", "http://example.com/r"])?;
    assert!(run(&store, &["delete", "http://example.com/r"]).is_err());
    Ok(())
}

#[test]
fn binary_resource_without_binary_is_rejected() -> Result<()> {
    let dir = TempDir::new()?;
    let store = dir.path().join("store.json");
    let result = run(
        &store,
        &["create", "http://example.com/b", "--model", "NonRDFSource"],
    );
    assert!(result.is_err());
    assert!(!store.exists());

    run(
        &store,
        &[
            "create",
            "http://example.com/b",
            "--model",
            "NonRDFSource",
            "--binary",
            "http://example.com/b#content",
            "--mime-type",
            "text/plain",
        ],
    )?;
    assert_eq!(
        MemorySession::load(&store)?.resource_identifiers(),
        vec!["http://example.com/b".to_string()]
    );
    Ok(())
}

#[test]
fn config_can_be_saved_and_reloaded() -> Result<()> {
    let dir = TempDir::new()?;
    let store = dir.path().join("store.json");
    let saved = dir.path().join("widequad.json");
    run(&store, &["config", "--save", saved.to_str().unwrap()])?;
    let config = Config::from_file(&saved)?;
    assert_eq!(config.keyspace, "trellis");

    // the saved file is accepted back through --config
    run(
        &store,
        &["--config", saved.to_str().unwrap(), "config"],
    )?;
    Ok(())
}

#[test]
fn unknown_subcommand_is_an_error() {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join("store.json");
    assert!(run(&store, &["frobnicate"]).is_err());
}
