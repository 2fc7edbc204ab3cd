//! Worker instruction templates.
//!
//! One static template per task class. Placeholders `{{workerId}}`,
//! `{{taskId}}` and `{{branchName}}` are substituted by
//! [`render_instructions`].

use crate::domain::{GranuleId, TaskClass, TaskRecord, WorkerId};

const EXPLORE: &str = "\
1. Survey the project: README, docs, specs and the code layout.
2. List the project artifacts that are missing, incomplete or out of date, and any domain knowledge that needs research.
3. Create one granule per gap you found. A gap without a granule is lost.
4. Complete task {{taskId}} with a summary of what you found and which granules you created.";

const PLAN: &str = "\
1. Make sure the project has its guiding documents (README, ARCHITECTURE, CONSTRAINTS, PROGRESS) and that they agree with each other.
2. For each feature in scope, write or update a spec with acceptance criteria first, then the design that satisfies them.
3. Break the work into the smallest independently valuable steps and create one granule per step, naming the spec it implements.
4. If no viable plan exists, release task {{taskId}} with the reason and stop.
5. If everything described is built and verified, create a granule of class Implemented whose content is the final report.
6. Complete task {{taskId}} with a summary of the plan and the granules you created.";

const IMPLEMENT: &str = "\
1. Pull the latest main branch and create the branch {{branchName}}.
2. Read the spec this task refers to and the constraints that apply.
3. Work test-first: write a failing test, make it pass, then refactor without changing behavior.
4. Commit and push {{branchName}}, then create a consolidate granule to merge it into main.
5. Create granules for any follow-up work you discovered.
6. Complete task {{taskId}} with a short summary. If you cannot finish, release it with the reason.";

const TEST: &str = "\
1. Pull the latest main branch and create the branch {{branchName}}.
2. Check the acceptance criteria of the relevant spec against the existing tests and add the missing ones.
3. Run the full suite. For every failure that is not yours to fix, create an implement granule describing it.
4. Commit and push {{branchName}} and create a consolidate granule for it.
5. Complete task {{taskId}} with the results.";

const REVIEW: &str = "\
1. Review the change or area named in the task against its spec and the project constraints.
2. Do not edit code. Create a granule for each concrete issue, with enough detail to act on it.
3. Complete task {{taskId}} with your verdict and the granules you created.";

const CONSOLIDATE: &str = "\
1. Merge the branch named in the task into main, resolving conflicts in favor of the specs.
2. Run the full test suite on the merged result and fix what the merge broke.
3. Update PROGRESS and any spec status that changed.
4. Push main, delete the merged branch, and create granules for anything left unresolved.
5. Complete task {{taskId}} with a summary of the merge.";

const AUDIT: &str = "\
1. The queue is otherwise idle. Audit the whole project: docs against code, specs against tests, constraints against the implementation.
2. Create a granule for every discrepancy.
3. If nothing is left to do, create a granule of class Implemented whose content is the final report.
4. Complete task {{taskId}} with a summary of the audit.";

const IMPLEMENTED: &str = "\
This task marks the project as finished. There is nothing to do; complete task {{taskId}}.";

impl TaskClass {
    /// Instruction template for workers handling this class.
    pub fn template(self) -> &'static str {
        match self {
            TaskClass::Explore => EXPLORE,
            TaskClass::Plan => PLAN,
            TaskClass::Implement => IMPLEMENT,
            TaskClass::Test => TEST,
            TaskClass::Review => REVIEW,
            TaskClass::Consolidate => CONSOLIDATE,
            TaskClass::Audit => AUDIT,
            TaskClass::Implemented => IMPLEMENTED,
        }
    }
}

/// `worker-<W>-task-<T>`
pub fn branch_name(worker: WorkerId, task: GranuleId) -> String {
    format!("worker-{worker}-task-{task}")
}

/// Full prompt for `worker` working on `record`.
pub fn render_instructions(worker: WorkerId, record: &TaskRecord) -> String {
    let branch = branch_name(worker, record.id);
    let body = record
        .class
        .template()
        .replace("{{workerId}}", &worker.to_string())
        .replace("{{taskId}}", &record.id.to_string())
        .replace("{{branchName}}", &branch);

    format!(
        "You are worker {worker}.\n\
         Your task (a granule):\n\
         - ID: {id}\n\
         - Class: {class}\n\
         - Content: {content}\n\
         \n\
         Task {id} is already claimed for you as worker {worker}. Do not claim it again.\n\
         Use the granules tools (list_granules, get_granule, create_granule, update_granule) to read and add work.\n\
         When you are done, call complete_granule with granuleId {id} and workerId {worker}.\n\
         If you cannot finish, call release_granule with granuleId {id}, workerId {worker} and an error saying why.\n\
         \n\
         Instructions:\n{body}",
        id = record.id,
        class = record.class,
        content = record.content(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn every_class_has_a_template() {
        for class in TaskClass::ALL {
            assert!(class.template().contains("{{taskId}}"), "{class}");
        }
    }

    #[test]
    fn render_substitutes_placeholders() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let record = TaskRecord::new(GranuleId::new(4), TaskClass::Implement, "add login", now);
        let text = render_instructions(WorkerId::new(2), &record);

        assert!(text.contains("You are worker W-2."));
        assert!(text.contains("- ID: T-4"));
        assert!(text.contains("- Class: implement"));
        assert!(text.contains("- Content: add login"));
        assert!(text.contains("worker-W-2-task-T-4"));
        assert!(text.contains("already claimed for you as worker W-2"));
        assert!(text.contains("complete_granule with granuleId T-4 and workerId W-2"));
        assert!(!text.contains("{{"));
    }

    #[test]
    fn no_class_tells_the_worker_to_claim() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for class in TaskClass::ALL {
            let record = TaskRecord::new(GranuleId::new(1), class, "x", now);
            let text = render_instructions(WorkerId::new(1), &record);
            let lower = text.to_lowercase();
            assert!(!lower.contains("claim task"), "{class}");
            assert!(!lower.contains("call claim_granule"), "{class}");
            assert!(!class.template().to_lowercase().contains("claim"), "{class}");
        }
    }
}
