//! End-to-end corpus unification over small on-disk fixtures.

use std::fs;
use std::path::Path;

use tempfile::TempDir;
use zhner_core::corpus::{CorpusConfig, CorpusUnifier};
use zhner_core::labels::LabelRegistry;
use zhner_core::tasks::{Target, Task};
use zhner_core::{Mode, ZhnerError};

const WEIBO_TRAIN: &str = "我0\tO\n在0\tO\n北0\tB-GPE.NAM\n京1\tI-GPE.NAM\n\n小0\tB-PER.NOM\n明1\tI-PER.NOM\n好0\tO\n";
const WEIBO_DEV: &str = "张0\tB-PER.NAM\n三1\tI-PER.NAM\n来0\tO\n";
const WEIBO_TEST: &str = "上0\tB-ORG.NAM\n海1\tI-ORG.NAM\n队0\tI-ORG.NAM\n赢0\tO\n";

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn fixture() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    write(root, "ner/weiboNER_2nd_conll.train", WEIBO_TRAIN);
    write(root, "ner/weiboNER_2nd_conll.dev", WEIBO_DEV);
    write(root, "ner/weiboNER_2nd_conll.test", WEIBO_TEST);

    let boson: String = (0..10)
        .map(|i| format!("{{{{person_name:李雷}}}}第{i}次去{{{{location:上海}}}}。很好！\n"))
        .collect();
    write(root, "ner/BosonNLP_NER_6C/BosonNLP_NER_6C.txt", &boson);

    let msra: String = (0..10)
        .map(|i| format!("张三/nr 在/p 北京/ns 第{i}/m\n"))
        .collect();
    write(root, "ner/MSRA/train1.txt", &msra);
    dir
}

fn unifier(root: &Path) -> CorpusUnifier {
    CorpusUnifier::new(CorpusConfig::new().with_root(root)).unwrap()
}

#[test]
fn weibo_partitions_by_file_name() {
    let dir = fixture();
    let split = unifier(dir.path()).read_weibo_entities().unwrap();
    assert_eq!(split.train.len(), 3);
    assert_eq!(split.eval.len(), 1);
    assert_eq!(split.eval[0].labels, ["B-ORG", "I-ORG", "I-ORG", "O"]);
    // Nominal mentions are background.
    assert!(split.train.iter().any(|s| s.text() == "小明好" && !s.has_entity("O")));
}

#[test]
fn entity_only_filter_drops_background_sentences() {
    let dir = fixture();
    let config = CorpusConfig::new().with_root(dir.path()).with_entity_only(true);
    let split = CorpusUnifier::new(config).unwrap().read_weibo_entities().unwrap();
    assert_eq!(split.train.len(), 2);
    assert!(split.train.iter().all(|s| s.has_entity("O")));
}

#[test]
fn joint_corpus_is_ordered_and_deterministic() {
    let dir = fixture();
    let a = unifier(dir.path()).read_joint().unwrap();
    let b = unifier(dir.path()).read_joint().unwrap();
    assert_eq!(a, b);

    // Weibo first, then 20 Boson sentences and 10 MSRA sentences split 80/20.
    assert_eq!(a.train.len(), 3 + 16 + 8);
    assert_eq!(a.eval.len(), 1 + 4 + 2);
    // Weibo files are read in sorted order: dev before train.
    assert_eq!(a.train[0].text(), "张三来");
    assert_eq!(a.train[1].text(), "我在北京");
    assert_eq!(a.eval[0].text(), "上海队赢");
    for sentence in a.train.iter().chain(&a.eval) {
        assert_eq!(sentence.chars.len(), sentence.labels.len());
    }
}

#[test]
fn missing_boson_corpus_is_fatal() {
    let dir = TempDir::new().unwrap();
    let err = unifier(dir.path()).read_joint().unwrap_err();
    match err {
        ZhnerError::CorpusNotFound { pattern, download } => {
            assert!(pattern.contains("BosonNLP"));
            assert!(download.ends_with("BosonNLP_NER_6C.zip"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn eval_reuses_train_label_encoder() {
    let dir = fixture();
    let labels_dir = dir.path().join("labels");
    let unifier = unifier(dir.path());

    let train_registry = LabelRegistry::with_dir(&labels_dir);
    let train = Task::WeiboNer
        .load(&unifier, &train_registry, Mode::Train)
        .unwrap();
    let train_encoder = train.encoder.clone().unwrap();
    assert!(labels_dir.join("WeiboNER_label_encoder.json").exists());
    // B-ORG appears only in the eval file.
    assert!(!train_encoder.contains("B-ORG"));

    let eval_registry = LabelRegistry::with_dir(&labels_dir);
    let eval = Task::WeiboNer
        .load(&unifier, &eval_registry, Mode::Eval)
        .unwrap();
    assert_eq!(eval.encoder.unwrap().labels(), train_encoder.labels());
}

#[test]
fn eval_without_trained_encoder_fails() {
    let dir = fixture();
    let registry = LabelRegistry::new();
    let err = Task::WeiboSegment
        .load(&unifier(dir.path()), &registry, Mode::Eval)
        .unwrap_err();
    assert!(matches!(err, ZhnerError::EncoderMissing { .. }));
}

#[test]
fn fake_classification_targets() {
    let dir = fixture();
    let data = Task::WeiboFakeCls
        .load(&unifier(dir.path()), &LabelRegistry::new(), Mode::Train)
        .unwrap();
    let classes: Vec<&Target> = data.examples().iter().map(|e| &e.target).collect();
    assert_eq!(
        classes,
        [
            &Target::Class("1".into()),
            &Target::Class("1".into()),
            &Target::Class("0".into()),
        ]
    );
}

#[test]
fn pretraining_documents_from_segments() {
    let dir = fixture();
    let data = Task::WeiboPretrain
        .load(&unifier(dir.path()), &LabelRegistry::new(), Mode::Train)
        .unwrap();
    assert!(data.encoder.is_none());
    assert_eq!(data.documents().len(), 3);
    assert_eq!(data.documents()[0], vec!["张三来".chars().collect::<Vec<_>>()]);
}
