// Use codspeed-criterion-compat when running on CodSpeed (CI), real criterion otherwise
#[cfg(codspeed)]
use codspeed_criterion_compat::{Bencher, Criterion, black_box, criterion_group, criterion_main};
#[cfg(not(codspeed))]
use criterion::{Bencher, Criterion, black_box, criterion_group, criterion_main};
use expy::{CompileOptions, compile, tokenize};

/// Measures tokenizing alone.
fn run_tokenize(bench: &mut Bencher, source: &str) {
    let tokens = tokenize(source).expect("benchmark source must tokenize");
    assert!(!tokens.is_empty());

    bench.iter(|| {
        let tokens = tokenize(black_box(source)).unwrap();
        black_box(tokens.len());
    });
}

/// Measures the whole pipeline from source text to a module code object.
fn run_compile(bench: &mut Bencher, source: &str) {
    let options = CompileOptions::default().with_filename("bench.py");
    let code = compile(source, &options).expect("benchmark source must compile");
    assert!(!code.code.is_empty());

    bench.iter(|| {
        let code = compile(black_box(source), &options).unwrap();
        black_box(code.code.len());
    });
}

/// Straight-line statements: mostly expression lowering and constant handling.
const ARITHMETIC: &str = "
x = 1
y = 2
total = 0
for _ in range(1000):
    total += x * y - (x // 3) % 7
    if total > 100 and not total & 1:
        total -= 1
result = [total, x, y, -1, 2.5, 'done']
";

/// Closures, comprehensions, classes and exception handling: scope resolution
/// and nested code objects.
const NESTED_SCOPES: &str = "
import os.path as p
from collections import OrderedDict

def make_counter(start=0, *, step=1):
    count = start
    def bump(times):
        nonlocal count
        for _ in range(times):
            count += step
        return count
    return bump

class Registry:
    '''Maps names to handlers.'''
    entries: dict = {}

    def register(self, name, *args, **kwargs):
        self.entries[name] = lambda: (args, kwargs)
        return super().register(name)

    def lookup(self, name):
        try:
            return self.entries[name]
        except KeyError as err:
            raise LookupError(f'missing {name!r}') from err
        finally:
            self.lookups = getattr(self, 'lookups', 0) + 1

squares = {n: n * n for n in range(20) if n % 2}
pairs = [(a, b) for a in range(5) for b in range(a) if a != b]
a, *rest = sorted(squares.values())
counter = make_counter(10, step=2)
print(counter(3), *rest, sep=', ', **OrderedDict())
";

/// Configures the compiler benchmark group.
fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("tokenize__arithmetic", |b| run_tokenize(b, ARITHMETIC));
    c.bench_function("compile__arithmetic", |b| run_compile(b, ARITHMETIC));
    c.bench_function("tokenize__nested_scopes", |b| run_tokenize(b, NESTED_SCOPES));
    c.bench_function("compile__nested_scopes", |b| run_compile(b, NESTED_SCOPES));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
