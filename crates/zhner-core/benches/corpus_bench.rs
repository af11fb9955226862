use criterion::{Criterion, black_box, criterion_group, criterion_main};
use zhner_core::ViterbiDecoder;
use zhner_core::corpus::{AnnotationFormat, BracketMarkupParser, SlashTagParser, SuffixTagParser};

fn bench_parsers(c: &mut Criterion) {
    let boson = "{{person_name:李雷}}昨天去了{{location:北京}}，参观了{{company_name:腾讯}}总部。很好！\n".repeat(200);
    let msra = "张三/nr 在/p 北京/ns 参加/v 新华社/nt 会议/n\n".repeat(200);
    let weibo = "我0\tO\n在0\tO\n北0\tB-GPE.NAM\n京1\tI-GPE.NAM\n\n".repeat(200);

    let parser = BracketMarkupParser::new().unwrap();
    c.bench_function("parse_boson_200_lines", |b| {
        b.iter(|| parser.parse(black_box(&boson)).unwrap())
    });
    c.bench_function("parse_msra_200_lines", |b| {
        b.iter(|| SlashTagParser.parse(black_box(&msra)).unwrap())
    });
    c.bench_function("parse_weibo_200_sentences", |b| {
        b.iter(|| SuffixTagParser.parse(black_box(&weibo)).unwrap())
    });
}

fn bench_viterbi(c: &mut Criterion) {
    let num_tags = 9;
    let emissions: Vec<Vec<f32>> = (0..128)
        .map(|t| (0..num_tags).map(|k| ((t * 7 + k * 3) % 11) as f32 / 11.0).collect())
        .collect();
    let transitions = vec![vec![0.1f32; num_tags]; num_tags];
    let decoder = ViterbiDecoder::new(num_tags);

    c.bench_function("viterbi_128x9", |b| {
        b.iter(|| decoder.decode(black_box(&emissions), black_box(&transitions)).unwrap())
    });
}

criterion_group!(benches, bench_parsers, bench_viterbi);
criterion_main!(benches);
