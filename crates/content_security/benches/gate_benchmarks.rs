//! Content security gate benchmarks.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use url::Url;

use content_security::{
    Channel, ContentPolicyType, ContentSecurityManager, ListenerError, LoadInfo, Principal,
    ResponseHead, SecurityMode, SecurityResult, StreamListener,
};

struct BenchChannel {
    load_info: Arc<LoadInfo>,
    uri: Url,
}

impl Channel for BenchChannel {
    fn load_info(&self) -> Option<Arc<LoadInfo>> {
        Some(Arc::clone(&self.load_info))
    }

    fn final_uri(&self) -> SecurityResult<Url> {
        Ok(self.uri.clone())
    }

    fn set_request_header(&self, _name: &str, _value: &str) {}
}

struct NullListener;

impl StreamListener for NullListener {
    fn on_start_request(&self, _response: &ResponseHead) -> Result<(), ListenerError> {
        Ok(())
    }

    fn on_data_available(&self, _data: &[u8]) -> Result<(), ListenerError> {
        Ok(())
    }

    fn on_stop_request(&self, _status: Result<(), ListenerError>) {}
}

fn channel(mode: SecurityMode, uri: &str) -> BenchChannel {
    let principal = Principal::from_url_str("https://example.com/").unwrap();
    let load_info = LoadInfo::builder(principal, mode)
        .content_policy_type(ContentPolicyType::Media)
        .build();
    BenchChannel {
        load_info: Arc::new(load_info),
        uri: Url::parse(uri).unwrap(),
    }
}

/// Benchmark the first evaluation of a load in each mode.
fn bench_initial_check(c: &mut Criterion) {
    let manager = ContentSecurityManager::default();
    let mut group = c.benchmark_group("initial_check");

    for mode in SecurityMode::ALL {
        let uri = if mode.requires_same_origin() {
            "https://example.com/video.webm"
        } else {
            "https://cdn.example.net/video.webm"
        };
        group.bench_with_input(BenchmarkId::new("mode", format!("{:?}", mode)), &mode, |b, &mode| {
            b.iter(|| {
                let channel = channel(mode, uri);
                black_box(manager.do_content_security_check(&channel, Arc::new(NullListener)))
            })
        });
    }

    group.finish();
}

/// Benchmark redirect re-checks, which only enforce the same-origin policy.
fn bench_redirect_check(c: &mut Criterion) {
    let manager = ContentSecurityManager::default();
    let channel = channel(
        SecurityMode::RequireSameOriginDataInherits,
        "https://example.com/video.webm",
    );
    let _ = manager.do_content_security_check(&channel, Arc::new(NullListener));

    c.bench_function("redirect_check", |b| {
        b.iter(|| black_box(manager.do_content_security_check(&channel, Arc::new(NullListener))))
    });
}

criterion_group!(benches, bench_initial_check, bench_redirect_check);
criterion_main!(benches);
