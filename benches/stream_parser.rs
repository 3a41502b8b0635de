use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use streamchat::core::stream_parser::{parse_lines, LineBuffer, StreamParser};

fn make_stream(objects: usize, text: &str) -> String {
    let mut lines = vec!["[{".to_string()];
    for i in 0..objects {
        if i > 0 {
            lines.push(",\r".to_string());
            lines.push("{".to_string());
        }
        lines.push("  \"candidates\": [".to_string());
        lines.push("    {".to_string());
        lines.push("      \"content\": {".to_string());
        lines.push(format!("        \"parts\": [{{\"text\": \"{text} {i}\"}}],"));
        lines.push("        \"role\": \"model\"".to_string());
        lines.push("      }".to_string());
        lines.push("    }".to_string());
        lines.push("  ]".to_string());
        lines.push("}".to_string());
    }
    lines.push("]".to_string());
    lines.join("\n")
}

fn feed_chunks(bytes: &[u8], chunk_size: usize) -> usize {
    let mut buffer = LineBuffer::new();
    let mut parser = StreamParser::new();
    let mut events = 0;
    for chunk in bytes.chunks(chunk_size) {
        for line in buffer.push(chunk) {
            events += parser.feed_line(&line).len();
        }
    }
    if let Some(line) = buffer.finish() {
        events += parser.feed_line(&line).len();
    }
    events + parser.finish().len()
}

fn bench_stream_parser(c: &mut Criterion) {
    let text = "lorem ipsum dolor sit amet consectetur adipiscing elit sed do eiusmod tempor";

    for &objects in &[50usize, 500usize] {
        let stream = make_stream(objects, text);
        let bytes = stream.as_bytes();

        let mut group = c.benchmark_group(format!("stream_parser_objects{objects}"));
        group.throughput(Throughput::Bytes(bytes.len() as u64));

        group.bench_function("whole_lines", |b| {
            b.iter(|| parse_lines(stream.lines()).len())
        });

        // Network reads rarely align with line boundaries.
        for chunk_size in [16usize, 1024] {
            group.bench_function(BenchmarkId::new("chunked", chunk_size), |b| {
                b.iter(|| feed_chunks(bytes, chunk_size))
            });
        }

        group.finish();
    }
}

criterion_group!(benches, bench_stream_parser);
criterion_main!(benches);
